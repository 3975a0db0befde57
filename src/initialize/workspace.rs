//! Workspace persistence
//!
//! The raw user-data and every script are kept under the workspace so the
//! scripts can run as transient units and the input stays inspectable.

use super::Environment;
use crate::CloudInitError;
use crate::system::fs::write_file;
use crate::userdata::Script;
use std::path::PathBuf;
use tracing::debug;

/// Save the raw user-data as `<workspace>/user-data`
pub async fn persist_user_data(env: &Environment, data: &[u8]) -> Result<PathBuf, CloudInitError> {
    let path = env.user_data_path();
    write_file(&path, data, 0o600).await?;
    debug!("Saved user-data to {}", path.display());
    Ok(path)
}

/// Save a script as `<workspace>/scripts/<index>`, executable
pub async fn persist_script(
    env: &Environment,
    index: usize,
    script: &Script,
) -> Result<PathBuf, CloudInitError> {
    let path = env.scripts_dir().join(index.to_string());
    write_file(&path, script.as_bytes(), 0o755).await?;
    Ok(path)
}

/// Transient unit name for the script at `index`
pub fn script_unit(index: usize) -> String {
    format!("coreos-cloudinit-{index}.service")
}
