//! EC2-compatible metadata service
//!
//! Reads the `2009-04-04` attribute tree. Attributes the service does not
//! have (404) are simply left out of the metadata.

use super::Datasource;
use super::url::fetch_optional;
use crate::CloudInitError;
use crate::fetch::Fetcher;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Link-local metadata endpoint
pub const DEFAULT_ROOT: &str = "http://169.254.169.254/";

pub const API_VERSION: &str = "2009-04-04";

/// `--from-ec2-metadata`
pub struct Ec2 {
    root: String,
    fetcher: Arc<dyn Fetcher>,
}

impl Ec2 {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_root(DEFAULT_ROOT, fetcher)
    }

    pub fn with_root(root: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self { root, fetcher }
    }

    fn versioned(&self) -> String {
        format!("{}{}", self.root, API_VERSION)
    }

    fn metadata_url(&self, attribute: &str) -> String {
        format!("{}/meta-data/{}", self.versioned(), attribute)
    }

    /// One attribute, `None` when the service does not have it
    async fn attribute(&self, attribute: &str) -> Result<Option<String>, CloudInitError> {
        match self.fetcher.fetch(&self.metadata_url(attribute)).await {
            Ok(body) => Ok(Some(String::from_utf8_lossy(&body).trim().to_string())),
            Err(e) if e.is_not_found() => {
                debug!("EC2 metadata has no {}", attribute);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ipv4(&self, attribute: &str) -> Result<Option<Ipv4Addr>, CloudInitError> {
        self.attribute(attribute)
            .await?
            .filter(|value| !value.is_empty())
            .map(|value| {
                value.parse().map_err(|_| {
                    CloudInitError::parse(format!("invalid {attribute} {value:?} in EC2 metadata"))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl Datasource for Ec2 {
    fn name(&self) -> &'static str {
        "ec2-metadata-service"
    }

    async fn is_available(&self) -> bool {
        self.fetcher.fetch(&self.versioned()).await.is_ok()
    }

    fn availability_changes(&self) -> bool {
        true
    }

    fn config_root(&self) -> String {
        self.root.clone()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        let mut metadata = Metadata::default();

        // Listing lines look like `0=my-key`
        if let Some(listing) = self.attribute("public-keys").await? {
            for line in listing.lines() {
                let Some((id, name)) = line.split_once('=') else {
                    continue;
                };
                if let Some(key) = self
                    .attribute(&format!("public-keys/{id}/openssh-key"))
                    .await?
                {
                    metadata.ssh_public_keys.insert(name.to_string(), key);
                }
            }
        }

        if let Some(hostname) = self.attribute("hostname").await? {
            metadata.hostname = hostname
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
        }
        metadata.private_ipv4 = self.ipv4("local-ipv4").await?;
        metadata.public_ipv4 = self.ipv4("public-ipv4").await?;

        Ok(metadata)
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        fetch_optional(self.fetcher.as_ref(), &format!("{}/user-data", self.versioned())).await
    }
}
