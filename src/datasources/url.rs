//! User-data from a URL

use super::Datasource;
use crate::CloudInitError;
use crate::fetch::Fetcher;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `--from-url`
pub struct RemoteFile {
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl RemoteFile {
    pub fn new(url: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            url: url.to_string(),
            fetcher,
        }
    }
}

/// Fetch `url`, treating "not found" as empty user-data
pub(crate) async fn fetch_optional(fetcher: &dyn Fetcher, url: &str) -> Result<Vec<u8>, CloudInitError> {
    match fetcher.fetch(url).await {
        Ok(body) => Ok(body),
        Err(e) if e.is_not_found() => {
            debug!("No user-data at {}", url);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Datasource for RemoteFile {
    fn name(&self) -> &'static str {
        "url"
    }

    async fn is_available(&self) -> bool {
        self.fetcher.fetch(&self.url).await.is_ok()
    }

    fn availability_changes(&self) -> bool {
        true
    }

    fn config_root(&self) -> String {
        self.url.clone()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        Ok(Metadata::default())
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        fetch_optional(self.fetcher.as_ref(), &self.url).await
    }
}
