//! Cloud-config parsing and types
//!
//! Handles the `#cloud-config` document: hostname, keys, users, files,
//! `coreos` service sections and units.

pub mod env;
pub mod merge;
pub mod scalar;
pub mod schema;
pub mod validate;

pub use env::{Etcd, Etcd2, Fleet, Flannel, Locksmith, Update};
pub use merge::{merge, merge_configs};

use crate::CloudInitError;
use crate::metadata::NetworkConfig;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Header that marks a cloud-config document
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// Main cloud-config structure
///
/// Represents the parsed cloud-config YAML that begins with `#cloud-config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// CoreOS service sections and units
    pub coreos: CoreosConfig,

    /// SSH authorized keys for the default user
    pub ssh_authorized_keys: Vec<String>,

    /// Hostname to set
    #[serde(deserialize_with = "scalar::string")]
    pub hostname: String,

    /// Users to create or update
    pub users: Vec<UserConfig>,

    /// Files to write
    pub write_files: Vec<WriteFileConfig>,

    /// Either empty or `localhost`
    #[serde(deserialize_with = "scalar::string")]
    pub manage_etc_hosts: String,

    /// Network configuration carried over from metadata
    #[serde(skip)]
    pub network_config: NetworkConfig,
}

/// The `coreos` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreosConfig {
    pub etcd: Etcd,
    pub etcd2: Etcd2,
    pub fleet: Fleet,
    pub flannel: Flannel,
    pub locksmith: Locksmith,
    pub oem: OemConfig,
    pub update: Update,
    pub units: Vec<UnitConfig>,
}

/// OEM release information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OemConfig {
    #[serde(deserialize_with = "scalar::string")]
    pub id: String,
    #[serde(deserialize_with = "scalar::string")]
    pub name: String,
    #[serde(deserialize_with = "scalar::string")]
    pub version_id: String,
    #[serde(deserialize_with = "scalar::string")]
    pub home_url: String,
    #[serde(deserialize_with = "scalar::string")]
    pub bug_report_url: String,
}

/// User configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    #[serde(deserialize_with = "scalar::string")]
    pub name: String,
    #[serde(rename = "passwd", deserialize_with = "scalar::string")]
    pub password_hash: String,
    pub ssh_authorized_keys: Vec<String>,
    #[serde(rename = "coreos_ssh_import_github", deserialize_with = "scalar::string")]
    pub ssh_import_github_user: String,
    #[serde(rename = "coreos_ssh_import_github_users")]
    pub ssh_import_github_users: Vec<String>,
    #[serde(rename = "coreos_ssh_import_url", deserialize_with = "scalar::string")]
    pub ssh_import_url: String,
    #[serde(deserialize_with = "scalar::string")]
    pub gecos: String,
    #[serde(deserialize_with = "scalar::string")]
    pub homedir: String,
    pub no_create_home: bool,
    #[serde(deserialize_with = "scalar::string")]
    pub primary_group: String,
    pub groups: Vec<String>,
    pub no_user_group: bool,
    pub system: bool,
    pub no_log_init: bool,
    #[serde(deserialize_with = "scalar::string")]
    pub shell: String,
    pub lock_passwd: bool,
}

impl UserConfig {
    /// GitHub accounts whose public keys should be imported
    pub fn github_users(&self) -> Vec<&str> {
        let mut users: Vec<&str> = Vec::new();
        if !self.ssh_import_github_user.is_empty() {
            users.push(&self.ssh_import_github_user);
        }
        for user in &self.ssh_import_github_users {
            if !users.contains(&user.as_str()) {
                users.push(user);
            }
        }
        users
    }
}

/// File to write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteFileConfig {
    #[serde(deserialize_with = "scalar::string")]
    pub path: String,
    #[serde(deserialize_with = "scalar::string")]
    pub content: String,
    #[serde(deserialize_with = "scalar::string")]
    pub encoding: String,
    #[serde(deserialize_with = "scalar::string")]
    pub owner: String,
    #[serde(deserialize_with = "scalar::string")]
    pub permissions: String,
}

impl WriteFileConfig {
    /// File mode, `0644` when unset
    pub fn permissions(&self) -> Result<u32, CloudInitError> {
        if self.permissions.is_empty() {
            return Ok(0o644);
        }
        u32::from_str_radix(&self.permissions, 8).map_err(|_| {
            CloudInitError::config(format!(
                "Unable to parse file permissions {:?} as integer",
                self.permissions
            ))
        })
    }

    /// Content with `encoding` undone
    pub fn decoded_content(&self) -> Result<Vec<u8>, CloudInitError> {
        decode_content(&self.content, &self.encoding)
    }
}

/// Decode `content` according to a `write_files` encoding
pub fn decode_content(content: &str, encoding: &str) -> Result<Vec<u8>, CloudInitError> {
    match encoding {
        "" => Ok(content.as_bytes().to_vec()),
        "base64" => decode_base64(content),
        "gzip" => gunzip(content.as_bytes()),
        "gzip+base64" => gunzip(&decode_base64(content)?),
        other => Err(CloudInitError::encoding(format!(
            "Unsupported encoding {other:?}"
        ))),
    }
}

pub(crate) fn decode_base64(content: &str) -> Result<Vec<u8>, CloudInitError> {
    let clean: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(clean)
        .map_err(|e| CloudInitError::encoding(format!("Invalid base64: {e}")))
}

pub(crate) fn gunzip(data: &[u8]) -> Result<Vec<u8>, CloudInitError> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| CloudInitError::encoding(format!("Failed to decompress gzip: {e}")))?;
    Ok(decoded)
}

/// A drop-in attached to a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropInConfig {
    #[serde(deserialize_with = "scalar::string")]
    pub name: String,
    #[serde(deserialize_with = "scalar::string")]
    pub content: String,
}

impl DropInConfig {
    /// File name inside `<unit>.d/`, `.conf` appended when missing
    pub fn file_name(&self) -> String {
        if self.name.ends_with(".conf") {
            self.name.clone()
        } else {
            format!("{}.conf", self.name)
        }
    }
}

/// systemd unit to place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    #[serde(deserialize_with = "scalar::string")]
    pub name: String,
    pub runtime: bool,
    pub enable: bool,
    pub mask: bool,
    #[serde(deserialize_with = "scalar::string")]
    pub content: String,
    #[serde(deserialize_with = "scalar::string")]
    pub command: String,
    pub drop_ins: Vec<DropInConfig>,
    /// Content is a `20-cloudinit.conf` drop-in rather than the unit itself
    #[serde(skip)]
    pub drop_in: bool,
}

/// Drop-in file name used for generated service overrides
pub const CLOUDINIT_DROP_IN: &str = "20-cloudinit.conf";

impl UnitConfig {
    /// `network` for `.network`, `.netdev` and `.link` units, else `system`
    pub fn group(&self) -> &'static str {
        match Path::new(&self.name).extension().and_then(|e| e.to_str()) {
            Some("network" | "netdev" | "link") => "network",
            _ => "system",
        }
    }

    /// Directory holding the unit, relative to the root
    pub fn directory(&self) -> PathBuf {
        let base = if self.runtime { "run" } else { "etc" };
        Path::new(base).join("systemd").join(self.group())
    }

    /// Where the unit file itself lives
    pub fn unit_path(&self) -> PathBuf {
        self.directory().join(&self.name)
    }

    /// Where `content` is written: the unit file or its cloudinit drop-in
    pub fn destination(&self) -> PathBuf {
        if self.drop_in {
            self.drop_in_path(CLOUDINIT_DROP_IN)
        } else {
            self.unit_path()
        }
    }

    /// Path of a named drop-in for this unit
    pub fn drop_in_path(&self, file_name: &str) -> PathBuf {
        self.directory()
            .join(format!("{}.d", self.name))
            .join(file_name)
    }
}

/// Operation requested on a unit through the init system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCommand {
    Start,
    Stop,
    Restart,
    Reload,
    TryRestart,
    ReloadOrRestart,
    ReloadOrTryRestart,
}

impl UnitCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
            Self::TryRestart => "try-restart",
            Self::ReloadOrRestart => "reload-or-restart",
            Self::ReloadOrTryRestart => "reload-or-try-restart",
        }
    }
}

impl fmt::Display for UnitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitCommand {
    type Err = CloudInitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "reload" => Ok(Self::Reload),
            "try-restart" => Ok(Self::TryRestart),
            "reload-or-restart" => Ok(Self::ReloadOrRestart),
            "reload-or-try-restart" => Ok(Self::ReloadOrTryRestart),
            other => Err(CloudInitError::config(format!(
                "invalid unit command {other:?}"
            ))),
        }
    }
}

/// Rewrite mapping keys from `kebab-case` to `snake_case`, recursively
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.replace('-', "_")),
                        other => other,
                    };
                    (k, normalize_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(normalize_keys).collect()),
        Value::Tagged(tagged) => normalize_keys(tagged.value),
        other => other,
    }
}

impl CloudConfig {
    /// Parse cloud-config from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, CloudInitError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(normalize_keys(value))?)
    }

    /// Check if this looks like a cloud-config (first line is `#cloud-config`)
    pub fn is_cloud_config(data: &str) -> bool {
        data.trim_start()
            .lines()
            .next()
            .is_some_and(|line| line.trim_end() == CLOUD_CONFIG_HEADER)
    }

    /// Reject options whose value is outside their declared valid set
    pub fn assert_valid(&self) -> Result<(), CloudInitError> {
        schema::assert_valid(&serde_yaml::to_value(self)?)
    }
}
