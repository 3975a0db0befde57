//! Filesystem helpers used while applying a configuration

use crate::CloudInitError;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// machine-id placeholder used by images that have not been booted yet
const MACHINE_ID_SENTINEL: &str = "42000000000000000000000000000042";

/// Join an absolute or relative `path` onto `root`
pub fn rooted(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// Write `content` with `mode`, creating parent directories
///
/// Identical content is left alone, only the mode is reapplied. A symlink at
/// `path` (such as a mask) is replaced, never followed. Returns whether the
/// content was written.
pub async fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<bool, CloudInitError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let unchanged = match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!("Replacing symlink at {}", path.display());
            fs::remove_file(path).await?;
            false
        }
        Ok(_) => fs::read(path).await? == content,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    if unchanged {
        debug!("{} is up to date", path.display());
    } else {
        info!("Writing file to {}", path.display());
        fs::write(path, content).await?;
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;

    Ok(!unchanged)
}

/// Replace `path` with a symlink to `/dev/null`
pub async fn mask(path: &Path) -> Result<(), CloudInitError> {
    info!("Masking unit file {}", path.display());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::symlink("/dev/null", path).await?;
    Ok(())
}

/// Read a text file, `None` when it does not exist
pub async fn read_optional(path: &Path) -> Result<Option<String>, CloudInitError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The machine id under `root`, ignoring the unbooted-image placeholder
pub async fn machine_id(root: &Path) -> Result<Option<String>, CloudInitError> {
    let id = read_optional(&rooted(root, "etc/machine-id"))
        .await?
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && id != MACHINE_ID_SENTINEL);
    Ok(id)
}
