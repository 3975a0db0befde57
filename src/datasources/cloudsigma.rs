//! CloudSigma server context
//!
//! The context is a JSON object served over the second serial port. A
//! request of `<\n\n>` returns the whole document on a single line.

use super::Datasource;
use crate::CloudInitError;
use crate::config::decode_base64;
use crate::metadata::Metadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS1";

const USERDATA_KEY: &str = "cloudinit-user-data";
const SSH_KEY: &str = "ssh_public_key";
const BASE64_FIELDS_KEY: &str = "base64_fields";

/// Source of the raw server context
#[async_trait]
pub trait ServerContext: Send + Sync {
    async fn read(&self) -> Result<Vec<u8>, CloudInitError>;
}

/// [`ServerContext`] over a serial device
#[derive(Debug, Clone)]
pub struct SerialPort {
    path: PathBuf,
}

impl SerialPort {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ServerContext for SerialPort {
    async fn read(&self) -> Result<Vec<u8>, CloudInitError> {
        let mut port = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;
        port.write_all(b"<\n\n>").await?;
        port.flush().await?;

        let mut line = Vec::new();
        BufReader::new(port).read_until(b'\n', &mut line).await?;
        Ok(line)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Context {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    nics: Vec<Nic>,
}

#[derive(Debug, Default, Deserialize)]
struct Nic {
    #[serde(default)]
    runtime: Option<NicRuntime>,
}

#[derive(Debug, Default, Deserialize)]
struct NicRuntime {
    #[serde(default)]
    interface_type: String,
    #[serde(default)]
    ip_v4: Option<IpRef>,
}

/// The address is carried in the `uuid` field
#[derive(Debug, Default, Deserialize)]
struct IpRef {
    #[serde(default)]
    uuid: String,
}

impl Context {
    fn parse(data: &[u8]) -> Result<Self, CloudInitError> {
        let mut context: Context = serde_json::from_slice(data)?;
        context.decode_meta()?;
        Ok(context)
    }

    /// Decode the meta entries named in `base64_fields`
    fn decode_meta(&mut self) -> Result<(), CloudInitError> {
        let fields = self.meta.get(BASE64_FIELDS_KEY).cloned().unwrap_or_default();
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if let Some(value) = self.meta.get_mut(field) {
                let decoded = decode_base64(value)?;
                *value = String::from_utf8(decoded).map_err(|_| {
                    CloudInitError::encoding(format!("meta field {field} is not UTF-8"))
                })?;
            }
        }
        Ok(())
    }

    fn metadata(&self) -> Result<Metadata, CloudInitError> {
        let mut metadata = Metadata {
            hostname: if self.name.is_empty() {
                self.uuid.clone()
            } else {
                self.name.clone()
            },
            ..Default::default()
        };

        if let Some(key) = self.meta.get(SSH_KEY).filter(|k| !k.is_empty()) {
            metadata
                .ssh_public_keys
                .insert("cloudsigma".to_string(), key.clone());
        }

        let public = self
            .nics
            .iter()
            .filter_map(|nic| nic.runtime.as_ref())
            .filter(|runtime| runtime.interface_type == "public")
            .find_map(|runtime| runtime.ip_v4.as_ref().filter(|ip| !ip.uuid.is_empty()));
        if let Some(ip) = public {
            let address = ip.uuid.parse().map_err(|_| {
                CloudInitError::parse(format!("invalid address {:?} in server context", ip.uuid))
            })?;
            metadata.public_ipv4 = Some(address);
        }
        Ok(metadata)
    }
}

/// `--from-cloudsigma-metadata`
pub struct CloudSigma<C = SerialPort> {
    context: C,
}

impl CloudSigma<SerialPort> {
    pub fn new() -> Self {
        Self::with_context(SerialPort::new(DEFAULT_SERIAL_PORT))
    }
}

impl Default for CloudSigma<SerialPort> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ServerContext> CloudSigma<C> {
    pub fn with_context(context: C) -> Self {
        Self { context }
    }

    async fn context(&self) -> Result<Context, CloudInitError> {
        Context::parse(&self.context.read().await?)
    }
}

#[async_trait]
impl<C: ServerContext> Datasource for CloudSigma<C> {
    fn name(&self) -> &'static str {
        "cloudsigma"
    }

    async fn is_available(&self) -> bool {
        match self.context().await {
            Ok(context) => !context.uuid.is_empty(),
            Err(e) => {
                debug!("CloudSigma server context unavailable: {}", e);
                false
            }
        }
    }

    fn availability_changes(&self) -> bool {
        false
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        self.context().await?.metadata()
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        let context = self.context().await?;
        Ok(context
            .meta
            .get(USERDATA_KEY)
            .map(|data| data.as_bytes().to_vec())
            .unwrap_or_default())
    }
}
