//! User-data from a local file

use super::Datasource;
use crate::CloudInitError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// `--from-file`
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Datasource for LocalFile {
    fn name(&self) -> &'static str {
        "local-file"
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok_and(|m| m.is_file())
    }

    fn availability_changes(&self) -> bool {
        true
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        Ok(Metadata::default())
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        debug!("Reading user-data from {}", self.path.display());
        Ok(tokio::fs::read(&self.path).await?)
    }
}
