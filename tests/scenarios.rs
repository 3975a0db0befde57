//! End-to-end provisioning scenarios
//!
//! Each test feeds raw user-data through parsing, merging and the
//! provisioner against a temporary root and a recording host.

use coreos_cloudinit::CloudInitError;
use coreos_cloudinit::config::merge::{merge, merge_all_configs};
use coreos_cloudinit::config::validate::validate;
use coreos_cloudinit::fetch::mock::MockFetcher;
use coreos_cloudinit::initialize::{Environment, Provisioner};
use coreos_cloudinit::metadata::Metadata;
use coreos_cloudinit::system::mock::{Call, CallLog, MockInitBus, MockSystem};
use coreos_cloudinit::userdata::{Script, UserData, parse_userdata};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

struct Host {
    dir: TempDir,
    log: CallLog,
    system: MockSystem,
    bus: MockInitBus,
    fetcher: MockFetcher,
}

impl Host {
    fn new() -> Self {
        Self::with_system(|system| system)
    }

    fn with_system(configure: impl FnOnce(MockSystem) -> MockSystem) -> Self {
        let log = CallLog::default();
        Self {
            dir: TempDir::new().unwrap(),
            system: configure(MockSystem::new(log.clone())),
            bus: MockInitBus::new(log.clone()),
            fetcher: MockFetcher::new(),
            log,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Parse, merge with `metadata` and apply
    async fn run(&self, userdata: &str, metadata: Metadata) -> Result<(), CloudInitError> {
        let (configs, scripts) = parse_userdata(userdata.as_bytes(), &self.fetcher)
            .await?
            .into_parts();
        let config = merge(&metadata, merge_all_configs(&configs)?);
        let env = Environment::new(self.root(), self.root().join("var/lib/coreos-cloudinit"))
            .with_substitutions(metadata.substitutions());
        Provisioner::new(&env, &self.system, &self.bus, &self.fetcher)
            .apply(&config, &scripts)
            .await
    }

    fn files(&self) -> Vec<String> {
        fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, base, out);
                } else {
                    out.push(path.strip_prefix(base).unwrap().display().to_string());
                }
            }
        }
        let mut out = Vec::new();
        walk(self.root(), self.root(), &mut out);
        out.sort();
        out
    }

    fn mode(&self, path: &str) -> u32 {
        std::fs::metadata(self.root().join(path))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    }
}

// ==================== Scenarios ====================

/// An empty cloud-config writes nothing and calls nothing
#[tokio::test]
async fn test_empty_config() {
    let host = Host::new();
    host.run("#cloud-config\n", Metadata::default()).await.unwrap();

    assert!(host.files().is_empty());
    assert!(host.log.calls().is_empty());
}

/// Hostname is set and /etc/hosts points at it
#[tokio::test]
async fn test_hosts_and_hostname() {
    let host = Host::with_system(|system| system.with_hostname("host1"));
    host.run(
        "#cloud-config\nhostname: host1\nmanage_etc_hosts: localhost\n",
        Metadata::default(),
    )
    .await
    .unwrap();

    assert_eq!(host.files(), vec!["etc/hosts"]);
    assert_eq!(
        std::fs::read_to_string(host.root().join("etc/hosts")).unwrap(),
        "127.0.0.1 host1\n"
    );
    assert_eq!(host.mode("etc/hosts"), 0o644);
    assert_eq!(host.log.calls()[0], Call::SetHostname("host1".to_string()));
}

/// etcd settings become a runtime drop-in named after the machine id
#[tokio::test]
async fn test_etcd_drop_in() {
    let host = Host::new();
    std::fs::create_dir_all(host.root().join("etc")).unwrap();
    std::fs::write(host.root().join("etc/machine-id"), "node001\n").unwrap();

    host.run(
        "#cloud-config\ncoreos:\n  etcd:\n    discovery: http://d.example/x\n    peer-bind-addr: 127.0.0.1:7002\n",
        Metadata::default(),
    )
    .await
    .unwrap();

    let drop_in = "run/systemd/system/etcd.service.d/20-cloudinit.conf";
    assert_eq!(
        std::fs::read_to_string(host.root().join(drop_in)).unwrap(),
        "[Service]\n\
         Environment=\"ETCD_DISCOVERY=http://d.example/x\"\n\
         Environment=\"ETCD_NAME=node001\"\n\
         Environment=\"ETCD_PEER_BIND_ADDR=127.0.0.1:7002\"\n"
    );
    assert_eq!(host.mode(drop_in), 0o644);
    assert!(host.log.calls().contains(&Call::Reload));
}

/// An invalid reboot strategy is rejected before anything is written
#[tokio::test]
async fn test_bad_reboot_strategy() {
    let host = Host::new();
    let err = host
        .run(
            "#cloud-config\ncoreos:\n  update:\n    reboot-strategy: wizzlewazzle\n",
            Metadata::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        r#"invalid value "wizzlewazzle" for option "RebootStrategy" (valid options: "best-effort,etcd-lock,reboot,off")"#
    );
    assert!(host.files().is_empty());
    assert!(host.log.calls().is_empty());
}

/// An include part resolves to exactly one script
#[tokio::test]
async fn test_mime_include() {
    let fetcher = MockFetcher::new().with_response("http://example.com/script", "#!/bin/bash\necho hi");
    let data = b"Content-Type: multipart/mixed; boundary=XYZ\n\n--XYZ\nContent-Type: text/x-include-url\n\nhttp://example.com/script\n--XYZ--\n";

    let parsed = parse_userdata(data, &fetcher).await.unwrap();
    assert_eq!(
        parsed,
        UserData::MultiPart(vec![UserData::Script(Script::new("#!/bin/bash\necho hi"))])
    );
}

// ==================== Metadata ====================

/// Metadata keys and hostname reach the host; user values win
#[tokio::test]
async fn test_metadata_merge() {
    let host = Host::new();
    let mut metadata = Metadata {
        hostname: "from-metadata".to_string(),
        public_ipv4: Some("203.0.113.7".parse().unwrap()),
        ..Default::default()
    };
    metadata
        .ssh_public_keys
        .insert("default".to_string(), "ssh-rsa META".to_string());

    host.run(
        "#cloud-config\nssh_authorized_keys:\n  - ssh-rsa USER\ncoreos:\n  units:\n    - name: web.service\n      content: \"[Service]\\nExecStart=/bin/serve $public_ipv4 $unknown\\n\"\n",
        metadata,
    )
    .await
    .unwrap();

    let calls = host.log.calls();
    assert_eq!(calls[0], Call::SetHostname("from-metadata".to_string()));
    assert_eq!(
        calls[1],
        Call::AuthorizeSshKeys {
            user: "core".to_string(),
            key_name: "coreos-cloudinit".to_string(),
            keys: vec!["ssh-rsa USER".to_string(), "ssh-rsa META".to_string()],
        }
    );
    assert_eq!(
        std::fs::read_to_string(host.root().join("etc/systemd/system/web.service")).unwrap(),
        "[Service]\nExecStart=/bin/serve 203.0.113.7 $unknown\n"
    );
}

/// Scripts run after the config, in document order, each once
#[tokio::test]
async fn test_multipart_scripts_after_config() {
    let host = Host::new();
    let data = "Content-Type: multipart/mixed; boundary=B\n\n--B\nContent-Type: text/x-shellscript\n\n#!/bin/sh\necho one\n--B\nContent-Type: text/cloud-config\n\n#cloud-config\nhostname: mixed\n--B\nContent-Type: text/x-shellscript\n\n#!/bin/sh\necho one\n--B--\n";
    host.run(data, Metadata::default()).await.unwrap();

    let calls = host.log.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], Call::SetHostname("mixed".to_string()));
    assert!(matches!(&calls[1], Call::StartTransientUnit { unit, .. } if unit == "coreos-cloudinit-0.service"));
    assert_eq!(host.mode("var/lib/coreos-cloudinit/scripts/0"), 0o755);
}

/// write_files content lands byte for byte with its mode
#[tokio::test]
async fn test_write_files() {
    let host = Host::new();
    host.run(
        "#cloud-config\nwrite_files:\n  - path: /etc/motd\n    permissions: \"0600\"\n    content: \"$public_ipv4 stays\\n\"\n  - path: /opt/data\n    encoding: base64\n    content: aGVsbG8=\n",
        Metadata {
            public_ipv4: Some("203.0.113.7".parse().unwrap()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(host.root().join("etc/motd")).unwrap(),
        "$public_ipv4 stays\n"
    );
    assert_eq!(host.mode("etc/motd"), 0o600);
    assert_eq!(std::fs::read(host.root().join("opt/data")).unwrap(), b"hello");
}

// ==================== Validation ====================

/// The validator reports problems with line numbers instead of failing
#[test]
fn test_validate_report() {
    let report = validate(b"#cloud-config\ncoreos:\n  update:\n    reboot-strategy: wizzlewazzle\n");
    assert!(report.has_errors());
    assert!(report.to_string().starts_with("line 4: error: "));

    assert!(validate(b"#!/bin/sh\nexit 0\n").is_empty());
    assert!(validate(b"#cloud-config\nhostname: ok\n").is_empty());
}

/// Arbitrary bytes never escape the validator
#[test]
fn test_validate_garbage() {
    let report = validate(&[0xff, 0x00, 0x1f, 0x8b, b'\n', b':']);
    assert!(report.has_errors());
}
