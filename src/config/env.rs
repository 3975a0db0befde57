//! Environment-driven service sections
//!
//! `etcd`, `etcd2`, `fleet`, `flannel`, `locksmith` and `update` are flat
//! records of string options. Each option carries the environment variable
//! the service reads it from, so the same table drives decoding, validation
//! and drop-in generation.

use super::schema::Valid;
use super::scalar;
use serde::{Deserialize, Serialize};

/// One option of an environment-driven section
#[derive(Debug, Clone, Copy)]
pub struct EnvOption {
    /// YAML key (underscore form)
    pub key: &'static str,
    /// Display name used in diagnostics
    pub name: &'static str,
    /// Environment variable; empty when the option is not exported
    pub env: &'static str,
    /// Optional validity constraint
    pub valid: Option<Valid>,
}

macro_rules! env_section {
    (@valid) => { None };
    (@valid $valid:expr) => { Some($valid) };
    (
        $(#[$meta:meta])*
        pub struct $section:ident {
            $( $field:ident => ($name:literal, $env:literal $(, $valid:expr)?), )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $section {
            $(
                #[serde(deserialize_with = "scalar::string", skip_serializing_if = "String::is_empty")]
                pub $field: String,
            )*
        }

        impl $section {
            /// Options in declaration order
            pub const OPTIONS: &'static [EnvOption] = &[
                $(
                    EnvOption {
                        key: stringify!($field),
                        name: $name,
                        env: $env,
                        valid: env_section!(@valid $($valid)?),
                    },
                )*
            ];

            /// Non-empty options in declaration order
            pub fn values(&self) -> Vec<(&'static EnvOption, &str)> {
                let fields = [$( self.$field.as_str(), )*];
                Self::OPTIONS
                    .iter()
                    .zip(fields)
                    .filter(|(_, value)| !value.is_empty())
                    .collect()
            }

            /// True when no option is set
            pub fn is_empty(&self) -> bool {
                self.values().is_empty()
            }

            /// `(VARIABLE, value)` pairs of the exported, non-empty options
            pub fn environment(&self) -> Vec<(String, String)> {
                self.values()
                    .into_iter()
                    .filter(|(option, _)| !option.env.is_empty())
                    .map(|(option, value)| (option.env.to_string(), value.to_string()))
                    .collect()
            }

            /// Reject values outside an option's valid set
            pub fn check(&self) -> Result<(), crate::CloudInitError> {
                for (option, value) in self.values() {
                    if let Some(valid) = option.valid {
                        valid.check(option.name, value)?;
                    }
                }
                Ok(())
            }
        }
    };
}

const WINDOW_START: Valid = Valid::Pattern(
    r"^((?i:sun|mon|tue|wed|thu|fri|sat) )?0*([0-9]|1[0-9]|2[0-3]):0*([0-9]|[1-5][0-9])$",
);
const WINDOW_LENGTH: Valid = Valid::Pattern(r"^[-+]?([0-9]*(\.[0-9]*)?[a-z]+)+$");
const REBOOT_STRATEGY: Valid = Valid::OneOf(&["best-effort", "etcd-lock", "reboot", "off"]);
const ETCD2_PROXY: Valid = Valid::OneOf(&["on", "off", "readonly"]);

env_section! {
    /// etcd (v0.4) daemon settings
    pub struct Etcd {
        addr => ("Addr", "ETCD_ADDR"),
        bind_addr => ("BindAddr", "ETCD_BIND_ADDR"),
        ca_file => ("CAFile", "ETCD_CA_FILE"),
        cert_file => ("CertFile", "ETCD_CERT_FILE"),
        cluster_active_size => ("ClusterActiveSize", "ETCD_CLUSTER_ACTIVE_SIZE"),
        cluster_remove_delay => ("ClusterRemoveDelay", "ETCD_CLUSTER_REMOVE_DELAY"),
        cluster_sync_interval => ("ClusterSyncInterval", "ETCD_CLUSTER_SYNC_INTERVAL"),
        cors => ("Cors", "ETCD_CORS"),
        data_dir => ("DataDir", "ETCD_DATA_DIR"),
        discovery => ("Discovery", "ETCD_DISCOVERY"),
        discovery_url => ("DiscoveryURL", ""),
        graphite_host => ("GraphiteHost", "ETCD_GRAPHITE_HOST"),
        http_read_timeout => ("HTTPReadTimeout", "ETCD_HTTP_READ_TIMEOUT"),
        http_write_timeout => ("HTTPWriteTimeout", "ETCD_HTTP_WRITE_TIMEOUT"),
        key_file => ("KeyFile", "ETCD_KEY_FILE"),
        max_cluster_size => ("MaxClusterSize", "ETCD_MAX_CLUSTER_SIZE"),
        max_result_buffer => ("MaxResultBuffer", "ETCD_MAX_RESULT_BUFFER"),
        max_retry_attempts => ("MaxRetryAttempts", "ETCD_MAX_RETRY_ATTEMPTS"),
        name => ("Name", "ETCD_NAME"),
        peer_addr => ("PeerAddr", "ETCD_PEER_ADDR"),
        peer_bind_addr => ("PeerBindAddr", "ETCD_PEER_BIND_ADDR"),
        peer_ca_file => ("PeerCAFile", "ETCD_PEER_CA_FILE"),
        peer_cert_file => ("PeerCertFile", "ETCD_PEER_CERT_FILE"),
        peer_election_timeout => ("PeerElectionTimeout", "ETCD_PEER_ELECTION_TIMEOUT"),
        peer_heartbeat_interval => ("PeerHeartbeatInterval", "ETCD_PEER_HEARTBEAT_INTERVAL"),
        peer_key_file => ("PeerKeyFile", "ETCD_PEER_KEY_FILE"),
        peers => ("Peers", "ETCD_PEERS"),
        peers_file => ("PeersFile", "ETCD_PEERS_FILE"),
        retry_interval => ("RetryInterval", "ETCD_RETRY_INTERVAL"),
        snapshot => ("Snapshot", "ETCD_SNAPSHOT"),
        snapshot_count => ("SnapshotCount", "ETCD_SNAPSHOTCOUNT"),
        str_trace => ("StrTrace", "ETCD_TRACE"),
        verbose => ("Verbose", "ETCD_VERBOSE"),
        very_verbose => ("VeryVerbose", "ETCD_VERY_VERBOSE"),
        very_very_verbose => ("VeryVeryVerbose", "ETCD_VERY_VERY_VERBOSE"),
    }
}

env_section! {
    /// etcd v2 daemon settings
    pub struct Etcd2 {
        advertise_client_urls => ("AdvertiseClientURLs", "ETCD_ADVERTISE_CLIENT_URLS"),
        ca_file => ("CAFile", "ETCD_CA_FILE"),
        cert_file => ("CertFile", "ETCD_CERT_FILE"),
        client_cert_auth => ("ClientCertAuth", "ETCD_CLIENT_CERT_AUTH"),
        cors => ("CorsOrigins", "ETCD_CORS"),
        data_dir => ("DataDir", "ETCD_DATA_DIR"),
        debug => ("Debug", "ETCD_DEBUG"),
        discovery => ("Discovery", "ETCD_DISCOVERY"),
        discovery_fallback => ("DiscoveryFallback", "ETCD_DISCOVERY_FALLBACK"),
        discovery_srv => ("DiscoverySRV", "ETCD_DISCOVERY_SRV"),
        discovery_proxy => ("DiscoveryProxy", "ETCD_DISCOVERY_PROXY"),
        election_timeout => ("ElectionTimeout", "ETCD_ELECTION_TIMEOUT"),
        force_new_cluster => ("ForceNewCluster", "ETCD_FORCE_NEW_CLUSTER"),
        heartbeat_interval => ("HeartbeatInterval", "ETCD_HEARTBEAT_INTERVAL"),
        initial_advertise_peer_urls => ("InitialAdvertisePeerURLs", "ETCD_INITIAL_ADVERTISE_PEER_URLS"),
        initial_cluster => ("InitialCluster", "ETCD_INITIAL_CLUSTER"),
        initial_cluster_state => ("InitialClusterState", "ETCD_INITIAL_CLUSTER_STATE"),
        initial_cluster_token => ("InitialClusterToken", "ETCD_INITIAL_CLUSTER_TOKEN"),
        key_file => ("KeyFile", "ETCD_KEY_FILE"),
        listen_client_urls => ("ListenClientURLs", "ETCD_LISTEN_CLIENT_URLS"),
        listen_peer_urls => ("ListenPeerURLs", "ETCD_LISTEN_PEER_URLS"),
        log_package_levels => ("LogPackageLevels", "ETCD_LOG_PACKAGE_LEVELS"),
        max_snapshots => ("MaxSnapshots", "ETCD_MAX_SNAPSHOTS"),
        max_wals => ("MaxWALs", "ETCD_MAX_WALS"),
        name => ("Name", "ETCD_NAME"),
        peer_ca_file => ("PeerCAFile", "ETCD_PEER_CA_FILE"),
        peer_cert_file => ("PeerCertFile", "ETCD_PEER_CERT_FILE"),
        peer_client_cert_auth => ("PeerClientCertAuth", "ETCD_PEER_CLIENT_CERT_AUTH"),
        peer_key_file => ("PeerKeyFile", "ETCD_PEER_KEY_FILE"),
        peer_trusted_ca_file => ("PeerTrustedCAFile", "ETCD_PEER_TRUSTED_CA_FILE"),
        proxy => ("Proxy", "ETCD_PROXY", ETCD2_PROXY),
        snapshot_count => ("SnapshotCount", "ETCD_SNAPSHOT_COUNT"),
        trusted_ca_file => ("TrustedCAFile", "ETCD_TRUSTED_CA_FILE"),
        wal_dir => ("WalDir", "ETCD_WAL_DIR"),
    }
}

env_section! {
    /// fleet daemon settings
    pub struct Fleet {
        agent_ttl => ("AgentTTL", "FLEET_AGENT_TTL"),
        enable_grpc => ("EnableGRPC", "FLEET_ENABLE_GRPC"),
        engine_reconcile_interval => ("EngineReconcileInterval", "FLEET_ENGINE_RECONCILE_INTERVAL"),
        etcd_cafile => ("EtcdCAFile", "FLEET_ETCD_CAFILE"),
        etcd_certfile => ("EtcdCertFile", "FLEET_ETCD_CERTFILE"),
        etcd_keyfile => ("EtcdKeyFile", "FLEET_ETCD_KEYFILE"),
        etcd_key_prefix => ("EtcdKeyPrefix", "FLEET_ETCD_KEY_PREFIX"),
        etcd_request_timeout => ("EtcdRequestTimeout", "FLEET_ETCD_REQUEST_TIMEOUT"),
        etcd_servers => ("EtcdServers", "FLEET_ETCD_SERVERS"),
        metadata => ("Metadata", "FLEET_METADATA"),
        public_ip => ("PublicIP", "FLEET_PUBLIC_IP"),
        token_limit => ("TokenLimit", "FLEET_TOKEN_LIMIT"),
        verbosity => ("Verbosity", "FLEET_VERBOSITY"),
    }
}

env_section! {
    /// flannel daemon settings
    pub struct Flannel {
        etcd_endpoints => ("EtcdEndpoints", "FLANNELD_ETCD_ENDPOINTS"),
        etcd_cafile => ("EtcdCAFile", "FLANNELD_ETCD_CAFILE"),
        etcd_certfile => ("EtcdCertFile", "FLANNELD_ETCD_CERTFILE"),
        etcd_keyfile => ("EtcdKeyFile", "FLANNELD_ETCD_KEYFILE"),
        etcd_prefix => ("EtcdPrefix", "FLANNELD_ETCD_PREFIX"),
        etcd_username => ("EtcdUsername", "FLANNELD_ETCD_USERNAME"),
        etcd_password => ("EtcdPassword", "FLANNELD_ETCD_PASSWORD"),
        ip_masq => ("IPMasq", "FLANNELD_IP_MASQ"),
        subnet_file => ("SubnetFile", "FLANNELD_SUBNET_FILE"),
        interface => ("Iface", "FLANNELD_IFACE"),
        public_ip => ("PublicIP", "FLANNELD_PUBLIC_IP"),
    }
}

env_section! {
    /// locksmith reboot manager settings
    pub struct Locksmith {
        endpoint => ("Endpoint", "LOCKSMITHD_ENDPOINT"),
        etcd_cafile => ("EtcdCAFile", "LOCKSMITHD_ETCD_CAFILE"),
        etcd_certfile => ("EtcdCertFile", "LOCKSMITHD_ETCD_CERTFILE"),
        etcd_keyfile => ("EtcdKeyFile", "LOCKSMITHD_ETCD_KEYFILE"),
        group => ("Group", "LOCKSMITHD_GROUP"),
        window_start => ("RebootWindowStart", "REBOOT_WINDOW_START", WINDOW_START),
        window_length => ("RebootWindowLength", "REBOOT_WINDOW_LENGTH", WINDOW_LENGTH),
    }
}

env_section! {
    /// update engine settings, written to update.conf
    pub struct Update {
        reboot_strategy => ("RebootStrategy", "REBOOT_STRATEGY", REBOOT_STRATEGY),
        group => ("Group", "GROUP"),
        server => ("Server", "SERVER"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_follow_declaration_order() {
        let etcd = Etcd {
            peer_bind_addr: "127.0.0.1:7002".to_string(),
            discovery: "http://d.example/x".to_string(),
            name: "node001".to_string(),
            ..Default::default()
        };

        let envs: Vec<&str> = etcd.values().iter().map(|(o, _)| o.env).collect();
        assert_eq!(envs, vec!["ETCD_DISCOVERY", "ETCD_NAME", "ETCD_PEER_BIND_ADDR"]);
    }

    #[test]
    fn test_empty_section() {
        assert!(Fleet::default().is_empty());
        let fleet = Fleet {
            public_ip: "10.0.0.1".to_string(),
            ..Default::default()
        };
        assert!(!fleet.is_empty());
    }

    #[test]
    fn test_decode_numbers_as_strings() {
        let update: Update = serde_yaml::from_str("group: 42\nserver: http://u").unwrap();
        assert_eq!(update.group, "42");
        assert_eq!(update.server, "http://u");
    }

    #[test]
    fn test_window_constraints() {
        let start = Locksmith::OPTIONS
            .iter()
            .find(|o| o.key == "window_start")
            .and_then(|o| o.valid)
            .unwrap();
        assert!(start.accepts("Sun 0:0"));
        assert!(start.accepts("mon 23:59"));
        assert!(start.accepts("12:30"));
        assert!(!start.accepts("Sunday 12:30"));
        assert!(!start.accepts("24:00"));

        let length = Locksmith::OPTIONS
            .iter()
            .find(|o| o.key == "window_length")
            .and_then(|o| o.valid)
            .unwrap();
        assert!(length.accepts("1h30m"));
        assert!(!length.accepts("1 hour"));
    }
}
