//! Network configuration module
//!
//! Converts provider network descriptions (Debian interfaces files,
//! DigitalOcean metadata, VMware guestinfo) into one interface graph and
//! renders it for systemd-networkd.

pub mod digitalocean;
pub mod interface;
pub mod networkd;
pub mod stanza;
pub mod vmware;

pub use interface::{Interface, build_interfaces};
pub use stanza::{InterfaceStanza, StanzaKind, parse_interfaces};

use crate::CloudInitError;
use crate::metadata::NetworkConfig;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Directory networkd files are placed in, relative to the root
pub const NETWORKD_DIR: &str = "run/systemd/network";

/// How an interface gets its addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigMethod {
    Static(StaticConfig),
    Loopback,
    Manual,
    Dhcp,
}

/// Addresses, resolvers and routes of a static interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticConfig {
    pub addresses: Vec<IpNet>,
    pub nameservers: Vec<IpAddr>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpNet,
    pub gateway: IpAddr,
}

impl Route {
    /// Default route of the gateway's address family
    pub fn default_via(gateway: IpAddr) -> Self {
        let destination = match gateway {
            IpAddr::V4(_) => IpNet::V4(Ipv4Net::default()),
            IpAddr::V6(_) => IpNet::V6(Ipv6Net::default()),
        };
        Self {
            destination,
            gateway,
        }
    }
}

/// A rendered configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// File name inside the networkd directory
    pub path: String,
    pub content: String,
}

impl RenderedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// A kernel module to load before networkd is restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleProbe {
    pub module: String,
    pub params: Vec<String>,
}

impl ModuleProbe {
    pub fn new(module: &str, params: Vec<String>) -> Self {
        Self {
            module: module.to_string(),
            params,
        }
    }
}

/// Format of the datasource's network configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetconfType {
    Debian,
    DigitalOcean,
    Vmware,
}

impl FromStr for NetconfType {
    type Err = CloudInitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debian" => Ok(Self::Debian),
            "digitalocean" => Ok(Self::DigitalOcean),
            "vmware" => Ok(Self::Vmware),
            other => Err(CloudInitError::config(format!(
                "invalid network config type {other:?} (valid: debian, digitalocean, vmware)"
            ))),
        }
    }
}

impl fmt::Display for NetconfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debian => "debian",
            Self::DigitalOcean => "digitalocean",
            Self::Vmware => "vmware",
        })
    }
}

/// Everything the network compiler produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPlan {
    pub interfaces: Vec<Interface>,
    /// Sorted by file name, which is also dependency order
    pub files: Vec<RenderedFile>,
    pub probes: Vec<ModuleProbe>,
}

impl NetworkPlan {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.probes.is_empty()
    }
}

/// Build the networkd plan for interface stanzas
pub fn compile(stanzas: Vec<InterfaceStanza>) -> Result<NetworkPlan, CloudInitError> {
    let interfaces = build_interfaces(stanzas)?;
    let files = networkd::render(&interfaces);
    let probes = networkd::probes(&interfaces);
    debug!(
        "Compiled {} interfaces into {} networkd files",
        interfaces.len(),
        files.len()
    );
    Ok(NetworkPlan {
        interfaces,
        files,
        probes,
    })
}

/// Convert a datasource's network configuration with the given converter
pub fn convert(kind: NetconfType, config: &NetworkConfig) -> Result<NetworkPlan, CloudInitError> {
    let stanzas = match (kind, config) {
        (_, NetworkConfig::None) => return Ok(NetworkPlan::default()),
        (NetconfType::Debian, NetworkConfig::Raw(data)) => {
            parse_interfaces(&String::from_utf8_lossy(data))?
        }
        (NetconfType::DigitalOcean, NetworkConfig::Raw(data)) => digitalocean::parse(data)?,
        (NetconfType::Vmware, NetworkConfig::Keys(keys)) => vmware::parse(keys)?,
        (kind, _) => {
            return Err(CloudInitError::config(format!(
                "network config from this datasource cannot be read as {kind}"
            )));
        }
    };
    compile(stanzas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_convert_debian() {
        let config = NetworkConfig::Raw(b"auto eth0\niface eth0 inet dhcp\n".to_vec());
        let plan = convert(NetconfType::Debian, &config).unwrap();
        assert_eq!(plan.files.len(), 1);
        assert!(plan.probes.is_empty());
    }

    #[test]
    fn test_convert_without_config() {
        let plan = convert(NetconfType::Vmware, &NetworkConfig::None).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_convert_mismatched_config() {
        let config = NetworkConfig::Keys(BTreeMap::new());
        assert!(convert(NetconfType::Debian, &config).is_err());
    }

    #[test]
    fn test_netconf_type() {
        assert_eq!("digitalocean".parse::<NetconfType>().unwrap(), NetconfType::DigitalOcean);
        assert!("netplan".parse::<NetconfType>().is_err());
    }

    #[test]
    fn test_default_route() {
        let route = Route::default_via("10.0.0.1".parse().unwrap());
        assert_eq!(route.destination.to_string(), "0.0.0.0/0");
    }
}
