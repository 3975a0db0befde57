//! Interface graph
//!
//! Nodes are registered first and linked in a second pass, so a parent can
//! refer to a device that is declared later in the file. Each node's
//! `depth` is one more than its deepest child; leaves sit at 0.

use super::stanza::{InterfaceStanza, StanzaKind};
use super::ConfigMethod;
use crate::CloudInitError;
use std::collections::BTreeMap;

/// A node in the interface graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub stanza: InterfaceStanza,
    /// Names of the devices stacked on this one (VLANs, the enslaving bond)
    pub children: Vec<String>,
    pub depth: usize,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.stanza.name
    }

    pub fn kind(&self) -> &StanzaKind {
        &self.stanza.kind
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(usize),
}

/// Build the graph, returned in ascending `(depth, name)` order
///
/// Loopback interfaces are dropped. Bond slaves and VLAN raw devices that
/// have no stanza of their own become `manual` physical interfaces.
pub fn build_interfaces(stanzas: Vec<InterfaceStanza>) -> Result<Vec<Interface>, CloudInitError> {
    let mut nodes: BTreeMap<String, Interface> = BTreeMap::new();

    for stanza in stanzas {
        if stanza.method == ConfigMethod::Loopback {
            continue;
        }
        nodes.insert(
            stanza.name.clone(),
            Interface {
                stanza,
                children: Vec::new(),
                depth: 0,
            },
        );
    }

    // Parents that were only mentioned
    let mut parents: Vec<(String, String)> = Vec::new();
    for node in nodes.values() {
        match node.kind() {
            StanzaKind::Bond { slaves } => {
                for slave in slaves {
                    parents.push((slave.clone(), node.name().to_string()));
                }
            }
            StanzaKind::Vlan { raw_device, .. } => {
                parents.push((raw_device.clone(), node.name().to_string()));
            }
            StanzaKind::Physical => {}
        }
    }

    for (parent, child) in parents {
        let node = nodes.entry(parent.clone()).or_insert_with(|| Interface {
            stanza: InterfaceStanza::manual(&parent),
            children: Vec::new(),
            depth: 0,
        });
        if matches!(node.kind(), StanzaKind::Vlan { .. }) {
            return Err(CloudInitError::parse(format!(
                "{child} cannot be stacked on vlan {parent}"
            )));
        }
        if !node.children.contains(&child) {
            node.children.push(child);
        }
    }

    let mut visits = BTreeMap::new();
    let names: Vec<String> = nodes.keys().cloned().collect();
    for name in &names {
        let depth = depth_of(name, &nodes, &mut visits)?;
        if let Some(node) = nodes.get_mut(name) {
            node.depth = depth;
        }
    }

    let mut ordered: Vec<Interface> = nodes.into_values().collect();
    ordered.sort_by(|a, b| (a.depth, a.name()).cmp(&(b.depth, b.name())));
    Ok(ordered)
}

fn depth_of(
    name: &str,
    nodes: &BTreeMap<String, Interface>,
    visits: &mut BTreeMap<String, Visit>,
) -> Result<usize, CloudInitError> {
    match visits.get(name) {
        Some(Visit::Done(depth)) => return Ok(*depth),
        Some(Visit::InProgress) => {
            return Err(CloudInitError::parse(format!(
                "interface dependency cycle through {name}"
            )));
        }
        None => {}
    }
    visits.insert(name.to_string(), Visit::InProgress);

    let mut depth = 0;
    if let Some(node) = nodes.get(name) {
        for child in &node.children {
            depth = depth.max(depth_of(child, nodes, visits)? + 1);
        }
    }

    visits.insert(name.to_string(), Visit::Done(depth));
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::stanza::parse_interfaces;

    fn graph(text: &str) -> Vec<Interface> {
        build_interfaces(parse_interfaces(text).unwrap()).unwrap()
    }

    #[test]
    fn test_bond_vlan_depths() {
        let ifaces = graph(
            "iface eth0 inet manual\niface bond0 inet manual\n  bond-slaves eth0\niface vlan1 inet manual\n  vlan_raw_device bond0\n",
        );
        let order: Vec<(&str, usize)> = ifaces.iter().map(|i| (i.name(), i.depth)).collect();
        assert_eq!(order, vec![("vlan1", 0), ("bond0", 1), ("eth0", 2)]);
        assert_eq!(ifaces[1].children, vec!["vlan1"]);
        assert_eq!(ifaces[2].children, vec!["bond0"]);
    }

    #[test]
    fn test_parent_deeper_than_children() {
        let ifaces = graph(
            "iface bond0 inet dhcp\n  bond-slaves eth0 eth1\niface bond0.5 inet manual\niface eth1.7 inet manual\n",
        );
        let depth: BTreeMap<&str, usize> = ifaces.iter().map(|i| (i.name(), i.depth)).collect();
        for iface in &ifaces {
            for child in &iface.children {
                assert!(depth[iface.name()] > depth[child.as_str()]);
            }
        }
        assert_eq!(depth["eth1"], 2);
    }

    #[test]
    fn test_missing_parents_synthesized() {
        let ifaces = graph("iface bond0 inet dhcp\n  bond-slaves eth0 eth1\n");
        let eth0 = ifaces.iter().find(|i| i.name() == "eth0").unwrap();
        assert_eq!(eth0.stanza.method, ConfigMethod::Manual);
        assert_eq!(eth0.children, vec!["bond0"]);
        assert_eq!(ifaces.len(), 3);
    }

    #[test]
    fn test_loopback_dropped() {
        let ifaces = graph("auto lo\niface lo inet loopback\niface eth0 inet dhcp\n");
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].name(), "eth0");
    }

    #[test]
    fn test_cycle_rejected() {
        let stanzas = parse_interfaces(
            "iface bond0 inet manual\n  bond-slaves bond1\niface bond1 inet manual\n  bond-slaves bond0\n",
        )
        .unwrap();
        let err = build_interfaces(stanzas).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
