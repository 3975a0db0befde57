//! Debian `interfaces(5)` parsing
//!
//! Lexes the raw file into logical lines, splits it into stanzas and turns
//! each `iface` stanza into an [`InterfaceStanza`].

use super::{ConfigMethod, Route, StaticConfig};
use crate::CloudInitError;
use ipnet::{IpNet, Ipv4Net};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// A parsed `iface` stanza with its kind resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStanza {
    pub name: String,
    pub auto: bool,
    pub kind: StanzaKind,
    pub method: ConfigMethod,
    /// MAC address from `hwaddress`
    pub hwaddress: Option<String>,
    /// Remaining options, last occurrence wins; `pre-down` commands accumulate
    pub options: BTreeMap<String, Vec<String>>,
}

/// What an `iface` stanza describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaKind {
    Physical,
    Bond { slaves: Vec<String> },
    Vlan { id: u16, raw_device: String },
}

impl InterfaceStanza {
    /// A bare `manual` physical interface
    pub fn manual(name: &str) -> Self {
        Self {
            name: name.to_string(),
            auto: false,
            kind: StanzaKind::Physical,
            method: ConfigMethod::Manual,
            hwaddress: None,
            options: BTreeMap::new(),
        }
    }

    /// `bond-*` options other than `bond-slaves`, as module parameters
    pub fn bond_params(&self) -> Vec<String> {
        self.options
            .iter()
            .filter_map(|(key, values)| {
                let param = key.strip_prefix("bond-").or_else(|| key.strip_prefix("bond_"))?;
                if param == "slaves" {
                    return None;
                }
                Some(format!("{}={}", param.replace('-', "_"), values.join(" ")))
            })
            .collect()
    }
}

/// Join continuations, drop comments and blank lines, trim what is left
fn lex(text: &str) -> Vec<String> {
    text.replace("\\\n", "")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn starts_stanza(line: &str) -> bool {
    match line.split_whitespace().next() {
        Some("auto" | "iface" | "mapping") => true,
        Some(word) => word.starts_with("allow-"),
        None => false,
    }
}

/// Group logical lines into stanzas
fn split_stanzas(lines: Vec<String>) -> Result<Vec<Vec<String>>, CloudInitError> {
    let mut stanzas: Vec<Vec<String>> = Vec::new();
    for line in lines {
        if starts_stanza(&line) {
            stanzas.push(vec![line]);
        } else if let Some(current) = stanzas.last_mut() {
            current.push(line);
        } else {
            return Err(CloudInitError::parse(format!(
                "missing stanza start: {line:?}"
            )));
        }
    }
    Ok(stanzas)
}

/// Parse an interfaces file into its `iface` stanzas, in file order
pub fn parse_interfaces(text: &str) -> Result<Vec<InterfaceStanza>, CloudInitError> {
    let mut auto = Vec::new();
    let mut interfaces = Vec::new();

    for stanza in split_stanzas(lex(text))? {
        let mut words = stanza[0].split_whitespace();
        match words.next() {
            Some("auto") => auto.extend(words.map(str::to_string)),
            Some("iface") => {
                let attributes: Vec<&str> = words.collect();
                interfaces.push(parse_iface(&attributes, &stanza[1..])?);
            }
            Some(other) => debug!("Skipping {} stanza", other),
            None => {}
        }
    }

    for iface in &mut interfaces {
        iface.auto = auto.contains(&iface.name);
    }
    Ok(interfaces)
}

fn parse_iface(attributes: &[&str], lines: &[String]) -> Result<InterfaceStanza, CloudInitError> {
    let [name, _family, method] = attributes else {
        return Err(CloudInitError::parse(format!(
            "malformed iface stanza: iface {}",
            attributes.join(" ")
        )));
    };
    let name = name.to_string();

    let mut options: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut post_up = Vec::new();
    for line in lines {
        let (key, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match key {
            "post-up" | "up" => post_up.push(rest.trim().to_string()),
            "pre-down" | "down" => options
                .entry("pre-down".to_string())
                .or_default()
                .push(rest.trim().to_string()),
            _ => {
                let values = rest.split_whitespace().map(str::to_string).collect();
                options.insert(key.to_string(), values);
            }
        }
    }

    let method = match *method {
        "static" => ConfigMethod::Static(parse_static(&name, &mut options, &post_up)?),
        "loopback" => ConfigMethod::Loopback,
        "manual" => ConfigMethod::Manual,
        "dhcp" => ConfigMethod::Dhcp,
        other => {
            return Err(CloudInitError::parse(format!(
                "invalid config method {other:?} for {name}"
            )));
        }
    };

    let hwaddress = options.remove("hwaddress").and_then(|values| match values.as_slice() {
        [_, mac] => Some(mac.clone()),
        [mac] => Some(mac.clone()),
        _ => None,
    });

    let kind = classify(&name, &options)?;

    Ok(InterfaceStanza {
        name,
        auto: false,
        kind,
        method,
        hwaddress,
        options,
    })
}

fn first<'a>(options: &'a BTreeMap<String, Vec<String>>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| options.get(*k))
        .and_then(|v| v.first())
        .map(String::as_str)
}

fn classify(name: &str, options: &BTreeMap<String, Vec<String>>) -> Result<StanzaKind, CloudInitError> {
    let raw_device = first(options, &["vlan_raw_device", "vlan-raw-device"]);
    if raw_device.is_some() || name.contains('.') {
        let malformed = || CloudInitError::parse(format!("malformed vlan name {name}"));
        let id = if let Some((_, id)) = name.rsplit_once('.') {
            id
        } else if let Some(id) = name.strip_prefix("vlan") {
            id
        } else {
            return Err(malformed());
        };
        let id: u16 = id.parse().map_err(|_| malformed())?;

        let raw_device = match raw_device {
            Some(device) => device.to_string(),
            None => match name.rsplit_once('.') {
                Some((device, _)) if !device.is_empty() => device.to_string(),
                _ => {
                    return Err(CloudInitError::parse(format!(
                        "vlan ({name}) missing raw device"
                    )));
                }
            },
        };
        return Ok(StanzaKind::Vlan { id, raw_device });
    }

    if let Some(slaves) = options.get("bond-slaves").or_else(|| options.get("bond_slaves")) {
        return Ok(StanzaKind::Bond {
            slaves: slaves.iter().filter(|s| *s != "none").cloned().collect(),
        });
    }

    Ok(StanzaKind::Physical)
}

fn parse_static(
    name: &str,
    options: &mut BTreeMap<String, Vec<String>>,
    post_up: &[String],
) -> Result<StaticConfig, CloudInitError> {
    let address = options.remove("address");
    let netmask = options.remove("netmask");
    let (Some(address), Some(netmask)) = (
        address.as_ref().and_then(|v| v.first()),
        netmask.as_ref().and_then(|v| v.first()),
    ) else {
        return Err(CloudInitError::parse(format!(
            "static config for {name} requires address and netmask"
        )));
    };

    let mut config = StaticConfig {
        addresses: vec![IpNet::V4(parse_network(name, address, netmask)?)],
        ..Default::default()
    };

    if let Some(gateway) = options.remove("gateway").and_then(|v| v.into_iter().next()) {
        config.routes.push(Route::default_via(parse_ip(name, &gateway)?));
    }

    if let Some(servers) = options.remove("dns-nameservers") {
        for server in servers {
            config.nameservers.push(parse_ip(name, &server)?);
        }
    }

    for command in post_up {
        if let Some(route) = parse_route(name, command)? {
            config.routes.push(route);
        }
    }

    Ok(config)
}

/// `route add -net X netmask M gw G`; other commands are not routes
fn parse_route(name: &str, command: &str) -> Result<Option<Route>, CloudInitError> {
    let words: Vec<&str> = command.split_whitespace().collect();
    if !words.starts_with(&["route", "add", "-net"]) {
        return Ok(None);
    }

    let value_of = |flag: &str| {
        words
            .iter()
            .position(|w| *w == flag)
            .and_then(|i| words.get(i + 1))
            .copied()
    };
    let (Some(network), Some(netmask), Some(gateway)) =
        (value_of("-net"), value_of("netmask"), value_of("gw"))
    else {
        return Err(CloudInitError::parse(format!(
            "malformed route for {name}: {command:?}"
        )));
    };

    Ok(Some(Route {
        destination: IpNet::V4(parse_network(name, network, netmask)?),
        gateway: parse_ip(name, gateway)?,
    }))
}

fn parse_ip(name: &str, text: &str) -> Result<IpAddr, CloudInitError> {
    text.parse()
        .map_err(|_| CloudInitError::parse(format!("invalid address {text:?} for {name}")))
}

/// Address plus netmask, the mask either dotted or a prefix length
fn parse_network(name: &str, address: &str, netmask: &str) -> Result<Ipv4Net, CloudInitError> {
    let invalid = || {
        CloudInitError::parse(format!(
            "invalid address {address:?} netmask {netmask:?} for {name}"
        ))
    };
    let ip: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix = match netmask.parse::<u8>() {
        Ok(prefix) => prefix,
        Err(_) => {
            let mask: Ipv4Addr = netmask.parse().map_err(|_| invalid())?;
            ipnet::ipv4_mask_to_prefix(mask).map_err(|_| invalid())?
        }
    };
    Ipv4Net::new(ip, prefix).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex() {
        let lines = lex("# comment\n\n  auto eth0  \niface eth0 inet \\\nmanual\n");
        assert_eq!(lines, vec!["auto eth0", "iface eth0 inet manual"]);
    }

    #[test]
    fn test_missing_stanza_start() {
        let err = parse_interfaces("address 10.0.0.1\niface eth0 inet dhcp\n").unwrap_err();
        assert!(err.to_string().contains("missing stanza start"));
    }

    #[test]
    fn test_parse_static() {
        let text = "auto eth0\niface eth0 inet static\n  address 10.0.0.5\n  netmask 255.255.255.0\n  gateway 10.0.0.1\n  dns-nameservers 8.8.8.8 8.8.4.4\n  post-up route add -net 192.168.0.0 netmask 255.255.0.0 gw 10.0.0.254\n";
        let ifaces = parse_interfaces(text).unwrap();
        assert_eq!(ifaces.len(), 1);
        let eth0 = &ifaces[0];
        assert!(eth0.auto);
        assert_eq!(eth0.kind, StanzaKind::Physical);

        let ConfigMethod::Static(config) = &eth0.method else {
            panic!("expected static config");
        };
        assert_eq!(config.addresses, vec!["10.0.0.5/24".parse::<IpNet>().unwrap()]);
        assert_eq!(config.nameservers.len(), 2);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].destination.to_string(), "0.0.0.0/0");
        assert_eq!(config.routes[1].destination.to_string(), "192.168.0.0/16");
        assert_eq!(config.routes[1].gateway.to_string(), "10.0.0.254");
    }

    #[test]
    fn test_pre_down_accumulates() {
        let text = "iface eth0 inet dhcp\n  pre-down ip link set eth0 down\n  down echo bye\n  mtu 1500\n  mtu 9000\n";
        let ifaces = parse_interfaces(text).unwrap();
        let eth0 = &ifaces[0];
        assert_eq!(
            eth0.options["pre-down"],
            vec!["ip link set eth0 down".to_string(), "echo bye".to_string()]
        );
        assert_eq!(eth0.options["mtu"], vec!["9000".to_string()]);
    }

    #[test]
    fn test_prefix_length_netmask() {
        let ifaces = parse_interfaces("iface eth0 inet static\naddress 10.1.2.3\nnetmask 20\n").unwrap();
        let ConfigMethod::Static(config) = &ifaces[0].method else {
            panic!("expected static config");
        };
        assert_eq!(config.addresses[0].to_string(), "10.1.2.3/20");
    }

    #[test]
    fn test_static_requires_netmask() {
        assert!(parse_interfaces("iface eth0 inet static\naddress 10.0.0.5\n").is_err());
        assert!(parse_interfaces("iface eth0 inet static\naddress bogus\nnetmask 24\n").is_err());
    }

    #[test]
    fn test_incomplete_route() {
        let text = "iface eth0 inet static\naddress 10.0.0.5\nnetmask 24\npost-up route add -net 10.1.0.0 netmask 255.255.0.0\n";
        assert!(parse_interfaces(text).is_err());
    }

    #[test]
    fn test_bad_iface_line() {
        assert!(parse_interfaces("iface eth0 inet\n").is_err());
        assert!(parse_interfaces("iface eth0 inet ppp\n").is_err());
    }

    #[test]
    fn test_vlan_classification() {
        let ifaces = parse_interfaces(
            "iface eth0.10 inet manual\niface vlan20 inet manual\n  vlan_raw_device eth1\n",
        )
        .unwrap();
        assert_eq!(
            ifaces[0].kind,
            StanzaKind::Vlan { id: 10, raw_device: "eth0".to_string() }
        );
        assert_eq!(
            ifaces[1].kind,
            StanzaKind::Vlan { id: 20, raw_device: "eth1".to_string() }
        );
    }

    #[test]
    fn test_malformed_vlan() {
        let err = parse_interfaces("iface eth0.x inet manual\n").unwrap_err();
        assert!(err.to_string().contains("malformed vlan name eth0.x"));

        let err = parse_interfaces("iface foo inet manual\n  vlan_raw_device eth0\n").unwrap_err();
        assert!(err.to_string().contains("malformed vlan name foo"));
    }

    #[test]
    fn test_bond_params() {
        let ifaces = parse_interfaces(
            "iface bond0 inet manual\n  bond-slaves eth0 eth1\n  bond-mode 4\n  bond-miimon 100\n  hwaddress ether 00:11:22:33:44:55\n",
        )
        .unwrap();
        let bond = &ifaces[0];
        assert_eq!(
            bond.kind,
            StanzaKind::Bond { slaves: vec!["eth0".to_string(), "eth1".to_string()] }
        );
        assert_eq!(bond.bond_params(), vec!["miimon=100", "mode=4"]);
        assert_eq!(bond.hwaddress.as_deref(), Some("00:11:22:33:44:55"));
    }

    #[test]
    fn test_other_stanzas_skipped() {
        let ifaces = parse_interfaces(
            "mapping eth0\n  script /bin/true\nallow-hotplug eth0\niface lo inet loopback\n",
        )
        .unwrap();
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].method, ConfigMethod::Loopback);
    }
}
