//! OpenStack-style config drive
//!
//! ```text
//! <root>/openstack/latest/meta_data.json
//! <root>/openstack/latest/user_data
//! <root>/openstack/content/0000          (network_config.content_path)
//! <root>/ec2/2009-04-04/user-data
//! ```

use super::Datasource;
use crate::CloudInitError;
use crate::metadata::{Metadata, NetworkConfig};
use crate::system::fs::rooted;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const OPENSTACK_VERSION: &str = "latest";
const EC2_VERSION: &str = "2009-04-04";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenstackMetadata {
    hostname: String,
    public_keys: BTreeMap<String, String>,
    network_config: OpenstackNetworkConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenstackNetworkConfig {
    content_path: String,
}

/// `--from-configdrive`
#[derive(Debug, Clone)]
pub struct ConfigDrive {
    root: PathBuf,
}

impl ConfigDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn openstack_root(&self) -> PathBuf {
        self.root.join("openstack")
    }

    fn openstack_versioned(&self) -> PathBuf {
        self.openstack_root().join(OPENSTACK_VERSION)
    }

    fn ec2_versioned(&self) -> PathBuf {
        self.root.join("ec2").join(EC2_VERSION)
    }
}

/// Read a file, `None` when it is missing
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CloudInitError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} is absent", path.display());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Datasource for ConfigDrive {
    fn name(&self) -> &'static str {
        "configdrive"
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(self.openstack_root()).await.is_ok()
            || tokio::fs::metadata(self.root.join("ec2")).await.is_ok()
    }

    fn availability_changes(&self) -> bool {
        true
    }

    fn config_root(&self) -> String {
        self.openstack_root().display().to_string()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        let Some(data) = read_optional(&self.openstack_versioned().join("meta_data.json")).await?
        else {
            return Ok(Metadata::default());
        };
        let raw: OpenstackMetadata = serde_json::from_slice(&data)?;

        let mut metadata = Metadata {
            hostname: raw.hostname,
            ssh_public_keys: raw.public_keys,
            ..Default::default()
        };

        if !raw.network_config.content_path.is_empty() {
            let path = rooted(&self.openstack_root(), &raw.network_config.content_path);
            if let Some(content) = read_optional(&path).await? {
                metadata.network_config = NetworkConfig::Raw(content);
            }
        }
        Ok(metadata)
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        if let Some(data) = read_optional(&self.ec2_versioned().join("user-data")).await? {
            return Ok(data);
        }
        Ok(read_optional(&self.openstack_versioned().join("user_data"))
            .await?
            .unwrap_or_default())
    }
}
