//! DigitalOcean metadata service

use super::Datasource;
use super::url::fetch_optional;
use crate::CloudInitError;
use crate::fetch::Fetcher;
use crate::metadata::{Metadata, NetworkConfig};
use crate::network::digitalocean::{DropletInterface, DropletMetadata};
use async_trait::async_trait;
use std::sync::Arc;

pub const DEFAULT_ROOT: &str = "http://169.254.169.254/";

const METADATA_PATH: &str = "metadata/v1.json";
const USERDATA_PATH: &str = "metadata/v1/user-data";

/// `--from-digitalocean-metadata`
pub struct DigitalOcean {
    root: String,
    fetcher: Arc<dyn Fetcher>,
}

impl DigitalOcean {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_root(DEFAULT_ROOT, fetcher)
    }

    pub fn with_root(root: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self { root, fetcher }
    }
}

fn ipv4_of(interface: &DropletInterface) -> Option<&str> {
    interface.ipv4.as_ref().map(|ip| ip.ip_address.as_str())
}

fn ipv6_of(interface: &DropletInterface) -> Option<&str> {
    interface.ipv6.as_ref().map(|ip| ip.ip_address.as_str())
}

fn first_ip(
    interfaces: &[DropletInterface],
    address: fn(&DropletInterface) -> Option<&str>,
) -> Option<&str> {
    interfaces
        .iter()
        .find_map(|i| address(i).filter(|ip| !ip.is_empty()))
}

fn parse_ip<T: std::str::FromStr>(ip: Option<&str>) -> Result<Option<T>, CloudInitError> {
    ip.map(|ip| {
        ip.parse()
            .map_err(|_| CloudInitError::parse(format!("invalid address {ip:?} in droplet metadata")))
    })
    .transpose()
}

/// Map the droplet document onto [`Metadata`], keeping it for network conversion
pub fn decode_metadata(data: &[u8]) -> Result<Metadata, CloudInitError> {
    let droplet = DropletMetadata::from_json(data)?;
    let public = &droplet.interfaces.public;
    let private = &droplet.interfaces.private;

    Ok(Metadata {
        hostname: droplet.hostname.clone(),
        ssh_public_keys: droplet
            .public_keys
            .iter()
            .enumerate()
            .map(|(n, key)| (format!("key-{n}"), key.clone()))
            .collect(),
        public_ipv4: parse_ip(first_ip(public, ipv4_of))?,
        public_ipv6: parse_ip(first_ip(public, ipv6_of))?,
        private_ipv4: parse_ip(first_ip(private, ipv4_of))?,
        private_ipv6: parse_ip(first_ip(private, ipv6_of))?,
        network_config: NetworkConfig::Raw(data.to_vec()),
    })
}

#[async_trait]
impl Datasource for DigitalOcean {
    fn name(&self) -> &'static str {
        "digitalocean-metadata-service"
    }

    async fn is_available(&self) -> bool {
        self.fetcher
            .fetch(&format!("{}{}", self.root, METADATA_PATH))
            .await
            .is_ok()
    }

    fn availability_changes(&self) -> bool {
        true
    }

    fn config_root(&self) -> String {
        self.root.clone()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        let data = self
            .fetcher
            .fetch(&format!("{}{}", self.root, METADATA_PATH))
            .await?;
        decode_metadata(&data)
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        fetch_optional(self.fetcher.as_ref(), &format!("{}{}", self.root, USERDATA_PATH)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::mock::MockFetcher;
    use std::net::Ipv4Addr;

    const DROPLET: &str = r#"{
        "droplet_id": 1,
        "hostname": "droplet1",
        "public_keys": ["ssh-rsa AAA one", "ssh-rsa BBB two"],
        "interfaces": {
            "public": [{
                "mac": "04:01:58:8a:5e:01",
                "type": "public",
                "ipv4": {"ip_address": "192.0.2.10", "netmask": "255.255.255.0", "gateway": "192.0.2.1"},
                "ipv6": {"ip_address": "2001:db8::10", "cidr": 64, "gateway": "2001:db8::1"}
            }],
            "private": [{
                "mac": "04:01:58:8a:5e:02",
                "type": "private",
                "ipv4": {"ip_address": "10.132.0.5", "netmask": "255.255.0.0", "gateway": "10.132.0.1"}
            }]
        },
        "dns": {"nameservers": ["8.8.8.8"]}
    }"#;

    #[test]
    fn test_decode_metadata() {
        let metadata = decode_metadata(DROPLET.as_bytes()).unwrap();
        assert_eq!(metadata.hostname, "droplet1");
        assert_eq!(metadata.ssh_public_keys["key-0"], "ssh-rsa AAA one");
        assert_eq!(metadata.ssh_public_keys["key-1"], "ssh-rsa BBB two");
        assert_eq!(metadata.public_ipv4, Some(Ipv4Addr::new(192, 0, 2, 10)));
        assert_eq!(metadata.public_ipv6, Some("2001:db8::10".parse().unwrap()));
        assert_eq!(metadata.private_ipv4, Some(Ipv4Addr::new(10, 132, 0, 5)));
        assert!(metadata.private_ipv6.is_none());
        assert_eq!(metadata.network_config, NetworkConfig::Raw(DROPLET.as_bytes().to_vec()));
    }

    #[tokio::test]
    async fn test_fetch() {
        let fetcher = MockFetcher::new()
            .with_response("http://do.test/metadata/v1.json", DROPLET)
            .with_response("http://do.test/metadata/v1/user-data", "#cloud-config\n");
        let source = DigitalOcean::with_root("http://do.test", Arc::new(fetcher));

        assert!(source.is_available().await);
        assert_eq!(source.fetch_metadata().await.unwrap().hostname, "droplet1");
        assert_eq!(source.fetch_userdata().await.unwrap(), b"#cloud-config\n");
    }

    #[test]
    fn test_bad_document() {
        assert!(decode_metadata(b"not json").is_err());
    }
}
