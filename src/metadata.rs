//! Canonical instance metadata
//!
//! Every datasource maps its provider-specific payload into [`Metadata`].
//! Absent fields stay empty.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Network configuration handed over by a datasource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NetworkConfig {
    #[default]
    None,
    /// Opaque document (Debian interfaces file, provider JSON)
    Raw(Vec<u8>),
    /// Flat key/value probes (VMware guestinfo)
    Keys(BTreeMap<String, String>),
}

impl NetworkConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Instance metadata retrieved from a datasource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub hostname: String,
    /// Key name to public key
    pub ssh_public_keys: BTreeMap<String, String>,
    pub public_ipv4: Option<Ipv4Addr>,
    pub public_ipv6: Option<Ipv6Addr>,
    pub private_ipv4: Option<Ipv4Addr>,
    pub private_ipv6: Option<Ipv6Addr>,
    pub network_config: NetworkConfig,
}

impl Metadata {
    /// Variables substituted into unit content (`$public_ipv4`, ...)
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        let mut add = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(format!("${name}"), value);
            }
        };
        add("public_ipv4", self.public_ipv4.map(|ip| ip.to_string()));
        add("private_ipv4", self.private_ipv4.map(|ip| ip.to_string()));
        add("public_ipv6", self.public_ipv6.map(|ip| ip.to_string()));
        add("private_ipv6", self.private_ipv6.map(|ip| ip.to_string()));
        vars
    }
}
