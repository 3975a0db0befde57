//! VMware guestinfo
//!
//! Keys are read one at a time over the backdoor channel with
//! `vmware-rpctool`, so the network keys are probed in the same order the
//! converter walks them.

use super::Datasource;
use crate::CloudInitError;
use crate::config::{decode_base64, gunzip};
use crate::metadata::{Metadata, NetworkConfig};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

const USERDATA_KEY: &str = "coreos.config.data";
const USERDATA_ENCODING_KEY: &str = "coreos.config.data.encoding";

/// Read access to `guestinfo.*` keys
#[async_trait]
pub trait GuestInfo: Send + Sync {
    /// Value of `guestinfo.<key>`, `None` when unset
    async fn get(&self, key: &str) -> Result<Option<String>, CloudInitError>;
}

/// [`GuestInfo`] through `vmware-rpctool`
#[derive(Debug, Clone, Default)]
pub struct RpcTool;

#[async_trait]
impl GuestInfo for RpcTool {
    async fn get(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        let output = tokio::process::Command::new("vmware-rpctool")
            .arg(format!("info-get guestinfo.{key}"))
            .output()
            .await
            .map_err(|e| CloudInitError::Command(format!("vmware-rpctool: {e}")))?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches('\n')
            .to_string();
        Ok(Some(value))
    }
}

/// Undo `coreos.config.data.encoding`
pub fn decode_userdata(data: &str, encoding: &str) -> Result<Vec<u8>, CloudInitError> {
    match encoding {
        "" => Ok(data.as_bytes().to_vec()),
        "base64" | "b64" => decode_base64(data),
        "gzip+base64" | "gz+b64" => gunzip(&decode_base64(data)?),
        other => Err(CloudInitError::encoding(format!(
            "Unsupported guestinfo encoding {other:?}"
        ))),
    }
}

/// `--from-vmware-guestinfo`
pub struct Vmware<G = RpcTool> {
    guestinfo: G,
}

impl Vmware<RpcTool> {
    pub fn new() -> Self {
        Self { guestinfo: RpcTool }
    }
}

impl Default for Vmware<RpcTool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GuestInfo> Vmware<G> {
    pub fn with_guestinfo(guestinfo: G) -> Self {
        Self { guestinfo }
    }

    /// Probe a key, recording it in `keys` when present
    async fn probe(&self, keys: &mut BTreeMap<String, String>, key: String) -> Result<bool, CloudInitError> {
        match self.guestinfo.get(&key).await? {
            Some(value) => {
                keys.insert(key, value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Every network key the converter may read
    async fn network_keys(&self) -> Result<BTreeMap<String, String>, CloudInitError> {
        let mut keys = BTreeMap::new();
        for n in 0.. {
            if !self.probe(&mut keys, format!("dns.server.{n}")).await? {
                break;
            }
        }

        for index in 0.. {
            let prefix = format!("interface.{index}");
            let named = self.probe(&mut keys, format!("{prefix}.name")).await?;
            let has_mac = self.probe(&mut keys, format!("{prefix}.mac")).await?;
            if !named && !has_mac {
                break;
            }
            self.probe(&mut keys, format!("{prefix}.dhcp")).await?;
            self.probe(&mut keys, format!("{prefix}.role")).await?;
            for ip in 0.. {
                if !self.probe(&mut keys, format!("{prefix}.ip.{ip}.address")).await? {
                    break;
                }
            }
            for route in 0.. {
                if !self
                    .probe(&mut keys, format!("{prefix}.route.{route}.gateway"))
                    .await?
                {
                    break;
                }
                self.probe(&mut keys, format!("{prefix}.route.{route}.destination"))
                    .await?;
            }
        }
        Ok(keys)
    }
}

/// First address of each role becomes the public or private address
fn role_addresses(keys: &BTreeMap<String, String>, metadata: &mut Metadata) {
    for index in 0.. {
        let prefix = format!("interface.{index}");
        if !keys.contains_key(&format!("{prefix}.name")) && !keys.contains_key(&format!("{prefix}.mac")) {
            break;
        }
        let role = keys.get(&format!("{prefix}.role")).map(String::as_str);
        let addresses = (0..)
            .map_while(|ip| keys.get(&format!("{prefix}.ip.{ip}.address")))
            .filter_map(|address| address.parse::<IpNet>().ok().map(|net| net.addr()));

        for address in addresses {
            match (role, address) {
                (Some("public"), IpAddr::V4(v4)) => {
                    metadata.public_ipv4.get_or_insert(v4);
                }
                (Some("public"), IpAddr::V6(v6)) => {
                    metadata.public_ipv6.get_or_insert(v6);
                }
                (Some("private"), IpAddr::V4(v4)) => {
                    metadata.private_ipv4.get_or_insert(v4);
                }
                (Some("private"), IpAddr::V6(v6)) => {
                    metadata.private_ipv6.get_or_insert(v6);
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl<G: GuestInfo> Datasource for Vmware<G> {
    fn name(&self) -> &'static str {
        "vmware"
    }

    async fn is_available(&self) -> bool {
        for key in [USERDATA_KEY, "hostname", "interface.0.name", "interface.0.mac"] {
            if let Ok(Some(_)) = self.guestinfo.get(key).await {
                return true;
            }
        }
        false
    }

    fn availability_changes(&self) -> bool {
        false
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        let mut metadata = Metadata {
            hostname: self.guestinfo.get("hostname").await?.unwrap_or_default(),
            ..Default::default()
        };

        let keys = self.network_keys().await?;
        debug!("Read {} guestinfo network keys", keys.len());
        role_addresses(&keys, &mut metadata);
        if !keys.is_empty() {
            metadata.network_config = NetworkConfig::Keys(keys);
        }
        Ok(metadata)
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        let Some(data) = self.guestinfo.get(USERDATA_KEY).await? else {
            return Ok(Vec::new());
        };
        let encoding = self
            .guestinfo
            .get(USERDATA_ENCODING_KEY)
            .await?
            .unwrap_or_default();
        decode_userdata(&data, &encoding)
    }
}
