//! VMware guestinfo network conversion
//!
//! Reads `interface.<n>.*` and `dns.server.<n>` keys. Interfaces are numbered
//! from 0 and the walk stops at the first index with neither a name nor a
//! MAC address.

use super::stanza::{InterfaceStanza, StanzaKind};
use super::{ConfigMethod, Route, StaticConfig};
use crate::CloudInitError;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

fn invalid(key: &str, value: &str) -> CloudInitError {
    CloudInitError::parse(format!("invalid value {value:?} for guestinfo {key}"))
}

/// Values of `<prefix>.0`, `<prefix>.1`, ... up to the first gap
fn indexed<'a>(keys: &'a BTreeMap<String, String>, prefix: &str) -> Vec<(String, &'a str)> {
    (0..)
        .map(|i| format!("{prefix}.{i}"))
        .map_while(|key| keys.get(&key).map(|v| (key, v.as_str())))
        .collect()
}

/// Convert guestinfo keys into interface stanzas
pub fn parse(keys: &BTreeMap<String, String>) -> Result<Vec<InterfaceStanza>, CloudInitError> {
    let mut nameservers = Vec::new();
    for (key, server) in indexed(keys, "dns.server") {
        nameservers.push(server.parse::<IpAddr>().map_err(|_| invalid(&key, server))?);
    }

    let mut stanzas = Vec::new();
    for index in 0.. {
        let prefix = format!("interface.{index}");
        let get = |suffix: &str| keys.get(&format!("{prefix}.{suffix}")).map(String::as_str);
        let (name, mac) = (get("name"), get("mac"));
        if name.is_none() && mac.is_none() {
            break;
        }
        let name = name.map_or_else(|| format!("eth{index}"), str::to_string);
        debug!("Found guestinfo interface {} ({})", index, name);

        let mut config = StaticConfig {
            nameservers: nameservers.clone(),
            ..Default::default()
        };
        for ip in 0.. {
            let key = format!("{prefix}.ip.{ip}.address");
            let Some(address) = keys.get(&key) else {
                break;
            };
            config
                .addresses
                .push(address.parse::<IpNet>().map_err(|_| invalid(&key, address))?);
        }
        for route in 0.. {
            let key = format!("{prefix}.route.{route}.gateway");
            let Some(gateway) = keys.get(&key) else {
                break;
            };
            let gateway: IpAddr = gateway.parse().map_err(|_| invalid(&key, gateway))?;

            let key = format!("{prefix}.route.{route}.destination");
            let route = match keys.get(&key) {
                Some(destination) => Route {
                    destination: destination.parse().map_err(|_| invalid(&key, destination))?,
                    gateway,
                },
                None => Route::default_via(gateway),
            };
            config.routes.push(route);
        }

        let method = if get("dhcp") == Some("yes") {
            ConfigMethod::Dhcp
        } else if config.addresses.is_empty() {
            ConfigMethod::Manual
        } else {
            ConfigMethod::Static(config)
        };

        stanzas.push(InterfaceStanza {
            name,
            auto: true,
            kind: StanzaKind::Physical,
            method,
            hwaddress: mac.map(str::to_string),
            options: BTreeMap::new(),
        });
    }

    Ok(stanzas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_static_interface() {
        let keys = keys(&[
            ("dns.server.0", "10.0.0.2"),
            ("interface.0.name", "ens192"),
            ("interface.0.mac", "00:50:56:00:00:01"),
            ("interface.0.dhcp", "no"),
            ("interface.0.ip.0.address", "10.0.0.10/24"),
            ("interface.0.route.0.gateway", "10.0.0.1"),
            ("interface.0.route.0.destination", "0.0.0.0/0"),
            ("interface.0.route.1.gateway", "10.0.0.254"),
            ("interface.0.route.1.destination", "172.16.0.0/12"),
        ]);
        let stanzas = parse(&keys).unwrap();
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].name, "ens192");
        assert_eq!(stanzas[0].hwaddress.as_deref(), Some("00:50:56:00:00:01"));

        let ConfigMethod::Static(config) = &stanzas[0].method else {
            panic!("expected static config");
        };
        assert_eq!(config.addresses[0].to_string(), "10.0.0.10/24");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].destination.to_string(), "172.16.0.0/12");
        assert_eq!(config.nameservers[0].to_string(), "10.0.0.2");
    }

    #[test]
    fn test_unnamed_dhcp_interfaces() {
        let keys = keys(&[
            ("interface.0.mac", "00:50:56:00:00:01"),
            ("interface.0.dhcp", "yes"),
            ("interface.1.mac", "00:50:56:00:00:02"),
            ("interface.3.mac", "00:50:56:00:00:04"),
        ]);
        let stanzas = parse(&keys).unwrap();
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0].name, "eth0");
        assert_eq!(stanzas[0].method, ConfigMethod::Dhcp);
        assert_eq!(stanzas[1].name, "eth1");
        assert_eq!(stanzas[1].method, ConfigMethod::Manual);
    }

    #[test]
    fn test_invalid_address() {
        let keys = keys(&[
            ("interface.0.name", "eth0"),
            ("interface.0.ip.0.address", "not-an-ip"),
        ]);
        assert!(parse(&keys).is_err());
    }
}
