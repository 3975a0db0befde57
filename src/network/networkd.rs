//! systemd-networkd renderer
//!
//! Generates .network, .netdev, and .link files for systemd-networkd.

use super::interface::Interface;
use super::stanza::StanzaKind;
use super::{ConfigMethod, ModuleProbe, RenderedFile};
use std::fmt::Write;
use tracing::warn;

/// Render every interface, files sorted by name
///
/// `.netdev` files always carry the `00-` prefix so virtual devices exist
/// before anything binds to them. `.link` and `.network` files carry the
/// interface depth in hex.
pub fn render(interfaces: &[Interface]) -> Vec<RenderedFile> {
    let mut files = Vec::new();

    for iface in interfaces {
        let prefix = format!("{:02x}-{}", iface.depth, iface.name());

        if let Some(netdev) = render_netdev(iface) {
            files.push(RenderedFile::new(format!("00-{}.netdev", iface.name()), netdev));
        }
        if let Some(link) = render_link(iface) {
            files.push(RenderedFile::new(format!("{prefix}.link"), link));
        }
        files.push(RenderedFile::new(
            format!("{prefix}.network"),
            render_network(iface, interfaces),
        ));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn render_netdev(iface: &Interface) -> Option<String> {
    let mut netdev = String::new();
    match iface.kind() {
        StanzaKind::Physical => return None,
        StanzaKind::Bond { .. } => {
            writeln!(netdev, "[NetDev]").unwrap();
            writeln!(netdev, "Kind=bond").unwrap();
            writeln!(netdev, "Name={}", iface.name()).unwrap();
        }
        StanzaKind::Vlan { id, .. } => {
            writeln!(netdev, "[NetDev]").unwrap();
            writeln!(netdev, "Kind=vlan").unwrap();
            writeln!(netdev, "Name={}", iface.name()).unwrap();
            if let Some(mac) = &iface.stanza.hwaddress {
                writeln!(netdev, "MACAddress={}", mac).unwrap();
            }
            writeln!(netdev).unwrap();
            writeln!(netdev, "[VLAN]").unwrap();
            writeln!(netdev, "Id={}", id).unwrap();
        }
    }
    Some(netdev)
}

fn render_link(iface: &Interface) -> Option<String> {
    if matches!(iface.kind(), StanzaKind::Bond { .. }) {
        return None;
    }
    let mac = iface.stanza.hwaddress.as_ref()?;

    let mut link = String::new();
    writeln!(link, "[Match]").unwrap();
    writeln!(link, "MACAddress={}", mac).unwrap();
    writeln!(link).unwrap();
    writeln!(link, "[Link]").unwrap();
    writeln!(link, "Name={}", iface.name()).unwrap();
    Some(link)
}

fn render_network(iface: &Interface, all: &[Interface]) -> String {
    let mut content = String::new();

    // [Match] section
    writeln!(content, "[Match]").unwrap();
    writeln!(content, "Name={}", iface.name()).unwrap();
    writeln!(content).unwrap();

    // [Network] section
    writeln!(content, "[Network]").unwrap();
    for child in &iface.children {
        match all.iter().find(|i| i.name() == child).map(Interface::kind) {
            Some(StanzaKind::Vlan { .. }) => writeln!(content, "VLAN={}", child).unwrap(),
            Some(StanzaKind::Bond { .. }) => writeln!(content, "Bond={}", child).unwrap(),
            _ => {}
        }
    }

    match &iface.stanza.method {
        ConfigMethod::Static(config) => {
            for dns in &config.nameservers {
                writeln!(content, "DNS={}", dns).unwrap();
            }
            for addr in &config.addresses {
                writeln!(content).unwrap();
                writeln!(content, "[Address]").unwrap();
                writeln!(content, "Address={}", addr).unwrap();
            }
            for route in &config.routes {
                writeln!(content).unwrap();
                writeln!(content, "[Route]").unwrap();
                writeln!(content, "Destination={}", route.destination).unwrap();
                writeln!(content, "Gateway={}", route.gateway).unwrap();
            }
        }
        ConfigMethod::Dhcp => writeln!(content, "DHCP=true").unwrap(),
        ConfigMethod::Manual | ConfigMethod::Loopback => {}
    }

    content
}

/// Kernel modules the rendered devices need
///
/// `8021q` when any VLAN exists, `bonding` with the first bond's `bond-*`
/// options as parameters. The module loads once, so bonds asking for other
/// parameters are logged and run with the first set.
pub fn probes(interfaces: &[Interface]) -> Vec<ModuleProbe> {
    let mut probes = Vec::new();

    if interfaces
        .iter()
        .any(|i| matches!(i.kind(), StanzaKind::Vlan { .. }))
    {
        probes.push(ModuleProbe::new("8021q", Vec::new()));
    }

    let mut bonds: Vec<&Interface> = interfaces
        .iter()
        .filter(|i| matches!(i.kind(), StanzaKind::Bond { .. }))
        .collect();
    bonds.sort_by_key(|i| i.name());
    if let Some((first, rest)) = bonds.split_first() {
        let params = first.stanza.bond_params();
        for bond in rest {
            let other = bond.stanza.bond_params();
            if other != params {
                warn!(
                    "{} wants bonding parameters {:?}, but the module is loaded with {:?} from {}",
                    bond.name(),
                    other,
                    params,
                    first.name()
                );
            }
        }
        probes.push(ModuleProbe::new("bonding", params));
    }

    probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::interface::build_interfaces;
    use crate::network::stanza::parse_interfaces;

    fn render_text(text: &str) -> Vec<RenderedFile> {
        render(&build_interfaces(parse_interfaces(text).unwrap()).unwrap())
    }

    fn content<'a>(files: &'a [RenderedFile], path: &str) -> &'a str {
        &files.iter().find(|f| f.path == path).unwrap().content
    }

    #[test]
    fn test_render_dhcp() {
        let files = render_text("iface eth0 inet dhcp\n");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "00-eth0.network");
        assert_eq!(
            files[0].content,
            "[Match]\nName=eth0\n\n[Network]\nDHCP=true\n"
        );
    }

    #[test]
    fn test_render_static() {
        let files = render_text(
            "iface eth0 inet static\n  address 192.168.1.10\n  netmask 255.255.255.0\n  gateway 192.168.1.1\n  dns-nameservers 8.8.8.8\n",
        );
        assert_eq!(
            content(&files, "00-eth0.network"),
            "[Match]\nName=eth0\n\n[Network]\nDNS=8.8.8.8\n\n[Address]\nAddress=192.168.1.10/24\n\n[Route]\nDestination=0.0.0.0/0\nGateway=192.168.1.1\n"
        );
    }

    #[test]
    fn test_render_bond_and_vlan() {
        let files = render_text(
            "iface eth0 inet manual\niface bond0 inet manual\n  bond-slaves eth0\niface vlan1 inet manual\n  vlan_raw_device bond0\n",
        );
        let names: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "00-bond0.netdev",
                "00-vlan1.netdev",
                "00-vlan1.network",
                "01-bond0.network",
                "02-eth0.network",
            ]
        );
        assert_eq!(content(&files, "00-bond0.netdev"), "[NetDev]\nKind=bond\nName=bond0\n");
        assert_eq!(
            content(&files, "00-vlan1.netdev"),
            "[NetDev]\nKind=vlan\nName=vlan1\n\n[VLAN]\nId=1\n"
        );
        assert!(content(&files, "02-eth0.network").contains("Bond=bond0\n"));
        assert!(content(&files, "01-bond0.network").contains("VLAN=vlan1\n"));
    }

    #[test]
    fn test_render_hwaddress() {
        let files = render_text(
            "iface eth0 inet dhcp\n  hwaddress ether 00:11:22:33:44:55\niface eth0.9 inet manual\n  hwaddress 66:77:88:99:aa:bb\n",
        );
        assert_eq!(
            content(&files, "01-eth0.link"),
            "[Match]\nMACAddress=00:11:22:33:44:55\n\n[Link]\nName=eth0\n"
        );
        assert!(content(&files, "00-eth0.9.netdev").contains("MACAddress=66:77:88:99:aa:bb\n"));
        assert!(files.iter().any(|f| f.path == "00-eth0.9.link"));
    }

    #[test]
    fn test_probes() {
        let ifaces = build_interfaces(
            parse_interfaces(
                "iface bond0 inet manual\n  bond-slaves eth0\n  bond-mode 4\niface eth0.2 inet manual\n",
            )
            .unwrap(),
        )
        .unwrap();
        let probes = probes(&ifaces);
        assert_eq!(probes[0], ModuleProbe::new("8021q", Vec::new()));
        assert_eq!(probes[1], ModuleProbe::new("bonding", vec!["mode=4".to_string()]));

        let plain = build_interfaces(parse_interfaces("iface eth0 inet dhcp\n").unwrap()).unwrap();
        assert!(super::probes(&plain).is_empty());
    }

    #[test]
    fn test_probes_differing_bonds_use_first() {
        let ifaces = build_interfaces(
            parse_interfaces(
                "iface bond1 inet manual\n  bond-slaves eth1\n  bond-mode 1\niface bond0 inet manual\n  bond-slaves eth0\n  bond-mode 4\n",
            )
            .unwrap(),
        )
        .unwrap();
        let probes = probes(&ifaces);
        assert_eq!(probes, vec![ModuleProbe::new("bonding", vec!["mode=4".to_string()])]);
    }
}
