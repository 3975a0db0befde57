//! DigitalOcean metadata network conversion
//!
//! Each public and private interface in `metadata/v1.json` becomes a
//! physical interface named `eth<N>` matched by its MAC address.

use super::stanza::{InterfaceStanza, StanzaKind};
use super::{ConfigMethod, Route, StaticConfig};
use crate::CloudInitError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The DigitalOcean `v1.json` document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletMetadata {
    pub droplet_id: Option<u64>,
    pub hostname: String,
    pub public_keys: Vec<String>,
    pub interfaces: DropletInterfaces,
    pub dns: DropletDns,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletInterfaces {
    pub public: Vec<DropletInterface>,
    pub private: Vec<DropletInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletInterface {
    pub mac: String,
    #[serde(rename = "type")]
    pub role: String,
    pub ipv4: Option<DropletIpv4>,
    pub ipv6: Option<DropletIpv6>,
    pub anchor_ipv4: Option<DropletIpv4>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletIpv4 {
    pub ip_address: String,
    pub netmask: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletIpv6 {
    pub ip_address: String,
    pub cidr: u8,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletDns {
    pub nameservers: Vec<String>,
}

impl DropletMetadata {
    pub fn from_json(data: &[u8]) -> Result<Self, CloudInitError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Public interfaces first, then private
    pub fn all_interfaces(&self) -> impl Iterator<Item = &DropletInterface> {
        self.interfaces
            .public
            .iter()
            .chain(self.interfaces.private.iter())
    }
}

fn invalid(what: &str, value: &str) -> CloudInitError {
    CloudInitError::parse(format!("invalid {what} {value:?} in droplet metadata"))
}

fn ipv4_network(ip: &DropletIpv4) -> Result<Ipv4Net, CloudInitError> {
    let addr: Ipv4Addr = ip
        .ip_address
        .parse()
        .map_err(|_| invalid("address", &ip.ip_address))?;
    let mask: Ipv4Addr = ip.netmask.parse().map_err(|_| invalid("netmask", &ip.netmask))?;
    let prefix = ipnet::ipv4_mask_to_prefix(mask).map_err(|_| invalid("netmask", &ip.netmask))?;
    Ipv4Net::new(addr, prefix).map_err(|_| invalid("netmask", &ip.netmask))
}

fn default_route(gateway: &str) -> Result<Option<Route>, CloudInitError> {
    if gateway.is_empty() {
        return Ok(None);
    }
    let gateway: IpAddr = gateway.parse().map_err(|_| invalid("gateway", gateway))?;
    Ok(Some(Route::default_via(gateway)))
}

/// Convert droplet metadata JSON into interface stanzas
pub fn parse(data: &[u8]) -> Result<Vec<InterfaceStanza>, CloudInitError> {
    let metadata = DropletMetadata::from_json(data)?;

    let mut nameservers = Vec::new();
    for server in &metadata.dns.nameservers {
        nameservers.push(
            server
                .parse::<IpAddr>()
                .map_err(|_| invalid("nameserver", server))?,
        );
    }

    let mut stanzas = Vec::new();
    for (index, iface) in metadata.all_interfaces().enumerate() {
        let mut config = StaticConfig {
            nameservers: nameservers.clone(),
            ..Default::default()
        };

        for ipv4 in [&iface.ipv4, &iface.anchor_ipv4].into_iter().flatten() {
            config.addresses.push(IpNet::V4(ipv4_network(ipv4)?));
        }
        if let Some(ipv4) = &iface.ipv4 {
            config.routes.extend(default_route(&ipv4.gateway)?);
        }
        if let Some(ipv6) = &iface.ipv6 {
            let addr: Ipv6Addr = ipv6
                .ip_address
                .parse()
                .map_err(|_| invalid("address", &ipv6.ip_address))?;
            let net = Ipv6Net::new(addr, ipv6.cidr)
                .map_err(|_| invalid("prefix", &ipv6.cidr.to_string()))?;
            config.addresses.push(IpNet::V6(net));
            config.routes.extend(default_route(&ipv6.gateway)?);
        }

        let method = if config.addresses.is_empty() {
            ConfigMethod::Manual
        } else {
            ConfigMethod::Static(config)
        };

        stanzas.push(InterfaceStanza {
            name: format!("eth{index}"),
            auto: true,
            kind: StanzaKind::Physical,
            method,
            hwaddress: (!iface.mac.is_empty()).then(|| iface.mac.clone()),
            options: BTreeMap::new(),
        });
    }

    Ok(stanzas)
}
