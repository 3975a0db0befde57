//! User-data URL from the kernel command line

use super::Datasource;
use super::url::fetch_optional;
use crate::CloudInitError;
use crate::fetch::Fetcher;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const PROC_CMDLINE: &str = "/proc/cmdline";

const URL_KEYS: [&str; 2] = ["cloud-config-url", "cloud_config_url"];

/// The last `cloud-config-url=` (or `cloud_config_url=`) on the command line
pub fn find_config_url(cmdline: &str) -> Option<String> {
    cmdline
        .split_whitespace()
        .filter_map(|arg| arg.split_once('='))
        .filter(|(key, value)| URL_KEYS.contains(key) && !value.is_empty())
        .map(|(_, value)| value.to_string())
        .last()
}

/// `--from-proc-cmdline`
pub struct ProcCmdline {
    path: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl ProcCmdline {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_path(PROC_CMDLINE, fetcher)
    }

    pub fn with_path(path: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            path: path.into(),
            fetcher,
        }
    }

    async fn config_url(&self) -> Result<String, CloudInitError> {
        let cmdline = tokio::fs::read_to_string(&self.path).await?;
        find_config_url(&cmdline).ok_or_else(|| {
            CloudInitError::Datasource(format!(
                "no cloud-config-url on {}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl Datasource for ProcCmdline {
    fn name(&self) -> &'static str {
        "proc-cmdline"
    }

    async fn is_available(&self) -> bool {
        self.config_url().await.is_ok()
    }

    fn availability_changes(&self) -> bool {
        false
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        Ok(Metadata::default())
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        let url = self.config_url().await?;
        debug!("Found cloud-config URL {} on the kernel command line", url);
        fetch_optional(self.fetcher.as_ref(), &url).await
    }
}
