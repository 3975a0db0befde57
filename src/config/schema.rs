//! Static schema of the cloud-config document
//!
//! The table is built once and shared by the validator (structure and
//! validity rules) and by [`CloudConfig::assert_valid`](super::CloudConfig::assert_valid).

use super::env::{EnvOption, Etcd, Etcd2, Fleet, Flannel, Locksmith, Update};
use crate::CloudInitError;
use regex::Regex;
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

/// Validity constraint attached to a scalar option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valid {
    /// Value must be one of the listed strings
    OneOf(&'static [&'static str]),
    /// Value must match the regular expression, compiled once in [`PATTERNS`]
    Pattern(&'static str),
}

impl Valid {
    /// Empty values are always accepted
    pub fn accepts(&self, value: &str) -> bool {
        if value.is_empty() {
            return true;
        }
        match self {
            Self::OneOf(options) => options.contains(&value),
            Self::Pattern(pattern) => PATTERNS.get(pattern).is_some_and(|re| re.is_match(value)),
        }
    }

    /// Error naming the option when `value` is rejected
    pub fn check(&self, name: &str, value: &str) -> Result<(), CloudInitError> {
        if self.accepts(value) {
            return Ok(());
        }
        Err(CloudInitError::config(format!(
            "invalid value {:?} for option {:?} (valid options: {:?})",
            value,
            name,
            self.describe()
        )))
    }

    /// Human readable list of accepted values
    pub fn describe(&self) -> String {
        match self {
            Self::OneOf(options) => options.join(","),
            Self::Pattern(pattern) => pattern.to_string(),
        }
    }
}

/// Shape of a schema slot
#[derive(Debug, Clone)]
pub enum Kind {
    Bool,
    Int,
    Float,
    String,
    Struct(Vec<Field>),
    Slice(Box<Kind>),
}

impl Kind {
    /// Look up a struct member by its underscore-normalized key
    pub fn field(&self, key: &str) -> Option<&Field> {
        match self {
            Self::Struct(fields) => fields.iter().find(|f| f.key == key),
            _ => None,
        }
    }

    /// Type name as shown in diagnostics (`string`, `[]struct`, ...)
    pub fn describe(&self) -> String {
        match self {
            Self::Bool => "bool".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::String => "string".to_string(),
            Self::Struct(_) => "struct".to_string(),
            Self::Slice(elem) => format!("[]{}", elem.describe()),
        }
    }
}

/// Named member of a struct slot
#[derive(Debug, Clone)]
pub struct Field {
    pub key: &'static str,
    pub name: &'static str,
    pub kind: Kind,
    pub valid: Option<Valid>,
}

fn field(key: &'static str, name: &'static str, kind: Kind) -> Field {
    Field {
        key,
        name,
        kind,
        valid: None,
    }
}

fn constrained(key: &'static str, name: &'static str, valid: Valid) -> Field {
    Field {
        key,
        name,
        kind: Kind::String,
        valid: Some(valid),
    }
}

fn strings() -> Kind {
    Kind::Slice(Box::new(Kind::String))
}

fn env_struct(options: &[EnvOption]) -> Kind {
    Kind::Struct(
        options
            .iter()
            .map(|o| Field {
                key: o.key,
                name: o.name,
                kind: Kind::String,
                valid: o.valid,
            })
            .collect(),
    )
}

/// Accepted unit commands
pub const UNIT_COMMANDS: Valid = Valid::OneOf(&[
    "start",
    "stop",
    "restart",
    "reload",
    "try-restart",
    "reload-or-restart",
    "reload-or-try-restart",
]);

/// Accepted `write_files` encodings
pub const FILE_ENCODINGS: Valid = Valid::OneOf(&["base64", "gzip", "gzip+base64"]);

fn unit() -> Kind {
    Kind::Struct(vec![
        field("name", "Name", Kind::String),
        field("runtime", "Runtime", Kind::Bool),
        field("enable", "Enable", Kind::Bool),
        field("mask", "Mask", Kind::Bool),
        field("content", "Content", Kind::String),
        constrained("command", "Command", UNIT_COMMANDS),
        field(
            "drop_ins",
            "DropIns",
            Kind::Slice(Box::new(Kind::Struct(vec![
                field("name", "Name", Kind::String),
                field("content", "Content", Kind::String),
            ]))),
        ),
    ])
}

fn user() -> Kind {
    Kind::Struct(vec![
        field("name", "Name", Kind::String),
        field("passwd", "PasswordHash", Kind::String),
        field("ssh_authorized_keys", "SSHAuthorizedKeys", strings()),
        field("coreos_ssh_import_github", "SSHImportGithubUser", Kind::String),
        field("coreos_ssh_import_github_users", "SSHImportGithubUsers", strings()),
        field("coreos_ssh_import_url", "SSHImportURL", Kind::String),
        field("gecos", "GECOS", Kind::String),
        field("homedir", "Homedir", Kind::String),
        field("no_create_home", "NoCreateHome", Kind::Bool),
        field("primary_group", "PrimaryGroup", Kind::String),
        field("groups", "Groups", strings()),
        field("no_user_group", "NoUserGroup", Kind::Bool),
        field("system", "System", Kind::Bool),
        field("no_log_init", "NoLogInit", Kind::Bool),
        field("shell", "Shell", Kind::String),
        field("lock_passwd", "LockPasswd", Kind::Bool),
    ])
}

fn write_file() -> Kind {
    Kind::Struct(vec![
        constrained("encoding", "Encoding", FILE_ENCODINGS),
        field("content", "Content", Kind::String),
        field("owner", "Owner", Kind::String),
        field("path", "Path", Kind::String),
        constrained(
            "permissions",
            "RawFilePermissions",
            Valid::Pattern(r"^0?[0-7]{3,4}$"),
        ),
    ])
}

fn oem() -> Kind {
    Kind::Struct(vec![
        field("id", "ID", Kind::String),
        field("name", "Name", Kind::String),
        field("version_id", "VersionID", Kind::String),
        field("home_url", "HomeURL", Kind::String),
        field("bug_report_url", "BugReportURL", Kind::String),
    ])
}

fn cloud_config() -> Kind {
    Kind::Struct(vec![
        field(
            "coreos",
            "CoreOS",
            Kind::Struct(vec![
                field("etcd", "Etcd", env_struct(Etcd::OPTIONS)),
                field("etcd2", "Etcd2", env_struct(Etcd2::OPTIONS)),
                field("fleet", "Fleet", env_struct(Fleet::OPTIONS)),
                field("flannel", "Flannel", env_struct(Flannel::OPTIONS)),
                field("locksmith", "Locksmith", env_struct(Locksmith::OPTIONS)),
                field("oem", "OEM", oem()),
                field("update", "Update", env_struct(Update::OPTIONS)),
                field("units", "Units", Kind::Slice(Box::new(unit()))),
            ]),
        ),
        field("ssh_authorized_keys", "SSHAuthorizedKeys", strings()),
        field("hostname", "Hostname", Kind::String),
        field("users", "Users", Kind::Slice(Box::new(user()))),
        field("write_files", "WriteFiles", Kind::Slice(Box::new(write_file()))),
        constrained(
            "manage_etc_hosts",
            "ManageEtcHosts",
            Valid::OneOf(&["localhost"]),
        ),
    ])
}

/// The cloud-config document schema
pub static SCHEMA: LazyLock<Kind> = LazyLock::new(cloud_config);

/// Every pattern constraint of [`SCHEMA`], compiled
pub static PATTERNS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    let mut patterns = HashMap::new();
    compile_patterns(&SCHEMA, &mut patterns);
    patterns
});

fn compile_patterns(kind: &Kind, patterns: &mut HashMap<&'static str, Regex>) {
    match kind {
        Kind::Struct(fields) => {
            for field in fields {
                if let Some(Valid::Pattern(pattern)) = field.valid
                    && !patterns.contains_key(pattern)
                {
                    match Regex::new(pattern) {
                        Ok(re) => {
                            patterns.insert(pattern, re);
                        }
                        Err(e) => warn!("Skipping invalid pattern for {}: {}", field.name, e),
                    }
                }
                compile_patterns(&field.kind, patterns);
            }
        }
        Kind::Slice(elem) => compile_patterns(elem, patterns),
        _ => {}
    }
}

/// Textual form of a YAML scalar, empty for null and non-scalars
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Check every constrained option of an already decoded document
pub fn assert_valid(document: &Value) -> Result<(), CloudInitError> {
    if let Kind::Struct(fields) = &*SCHEMA {
        check_fields(document, fields)?;
    }
    Ok(())
}

fn check_fields(value: &Value, fields: &[Field]) -> Result<(), CloudInitError> {
    let Value::Mapping(map) = value else {
        return Ok(());
    };
    for field in fields {
        if let Some(child) = map.get(field.key) {
            check_field(child, field, &field.kind)?;
        }
    }
    Ok(())
}

fn check_field(value: &Value, field: &Field, kind: &Kind) -> Result<(), CloudInitError> {
    match kind {
        Kind::Struct(fields) => check_fields(value, fields),
        Kind::Slice(elem) => {
            if let Value::Sequence(items) = value {
                for item in items {
                    check_field(item, field, elem)?;
                }
            }
            Ok(())
        }
        _ => {
            let Some(valid) = field.valid else {
                return Ok(());
            };
            valid.check(field.name, &scalar_text(value))
        }
    }
}
