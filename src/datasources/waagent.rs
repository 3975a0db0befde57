//! Azure agent files
//!
//! The Azure Linux agent leaves `SharedConfig.xml`, `CustomData` and a
//! `provisioned` marker in its state directory once it has run.

use super::Datasource;
use crate::CloudInitError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_ROOT: &str = "/var/lib/waagent";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SharedConfig {
    #[serde(rename = "Incarnation")]
    incarnation: Incarnation,
    #[serde(rename = "Instances")]
    instances: Instances,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Incarnation {
    #[serde(rename = "@instance")]
    instance: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Instances {
    #[serde(rename = "Instance")]
    instances: Vec<Instance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Instance {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@address")]
    address: String,
    #[serde(rename = "InputEndpoints")]
    input_endpoints: InputEndpoints,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InputEndpoints {
    #[serde(rename = "Endpoint")]
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Endpoint {
    #[serde(rename = "@loadBalancedPublicAddress")]
    load_balanced_public_address: String,
}

/// Addresses of this instance from `SharedConfig.xml`
///
/// The private address is the one of the instance named by the current
/// incarnation; the public one comes from its first load-balanced endpoint.
pub fn decode_shared_config(xml: &str) -> Result<Metadata, CloudInitError> {
    let config: SharedConfig = quick_xml::de::from_str(xml)
        .map_err(|e| CloudInitError::parse(format!("invalid SharedConfig.xml: {e}")))?;

    let mut metadata = Metadata::default();
    let Some(instance) = config
        .instances
        .instances
        .iter()
        .find(|i| i.id == config.incarnation.instance)
    else {
        debug!("No instance matches incarnation {:?}", config.incarnation.instance);
        return Ok(metadata);
    };

    metadata.private_ipv4 = instance.address.parse::<Ipv4Addr>().ok();
    metadata.public_ipv4 = instance
        .input_endpoints
        .endpoints
        .iter()
        .find_map(|e| e.load_balanced_public_address.parse::<SocketAddr>().ok())
        .and_then(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        });
    Ok(metadata)
}

/// `--from-waagent`
#[derive(Debug, Clone)]
pub struct Waagent {
    root: PathBuf,
}

impl Waagent {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CloudInitError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Datasource for Waagent {
    fn name(&self) -> &'static str {
        "waagent"
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(self.root.join("provisioned")).await.is_ok()
    }

    fn availability_changes(&self) -> bool {
        true
    }

    fn config_root(&self) -> String {
        self.root.display().to_string()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        match read_optional(&self.root.join("SharedConfig.xml")).await? {
            Some(xml) => decode_shared_config(&String::from_utf8_lossy(&xml)),
            None => Ok(Metadata::default()),
        }
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        Ok(read_optional(&self.root.join("CustomData"))
            .await?
            .unwrap_or_default())
    }
}
