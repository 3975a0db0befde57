//! Process-wide settings threaded through provisioning

use crate::modules::ssh_keys::GITHUB_API;
use crate::network::NetconfType;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default workspace directory
pub const DEFAULT_WORKSPACE: &str = "/var/lib/coreos-cloudinit";

/// Default name under which SSH keys are installed
pub const DEFAULT_SSH_KEY_NAME: &str = "coreos-cloudinit";

/// Settings built once from the command line
#[derive(Debug, Clone)]
pub struct Environment {
    /// Root every host path is written under
    pub root: PathBuf,
    /// Root of the datasource's files, if it has any
    pub config_root: PathBuf,
    pub workspace: PathBuf,
    pub ssh_key_name: String,
    pub github_api: String,
    /// `$public_ipv4` style variables for unit content
    pub substitutions: BTreeMap<String, String>,
    /// Converter for the metadata's network configuration
    pub netconf: Option<NetconfType>,
}

impl Environment {
    pub fn new(root: impl AsRef<Path>, workspace: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config_root: PathBuf::new(),
            workspace: workspace.as_ref().to_path_buf(),
            ssh_key_name: DEFAULT_SSH_KEY_NAME.to_string(),
            github_api: GITHUB_API.to_string(),
            substitutions: BTreeMap::new(),
            netconf: None,
        }
    }

    pub fn with_config_root(mut self, config_root: impl AsRef<Path>) -> Self {
        self.config_root = config_root.as_ref().to_path_buf();
        self
    }

    pub fn with_ssh_key_name(mut self, name: &str) -> Self {
        self.ssh_key_name = name.to_string();
        self
    }

    pub fn with_github_api(mut self, api: &str) -> Self {
        self.github_api = api.to_string();
        self
    }

    pub fn with_substitutions(mut self, substitutions: BTreeMap<String, String>) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn with_netconf(mut self, netconf: Option<NetconfType>) -> Self {
        self.netconf = netconf;
        self
    }

    /// `<workspace>/user-data`
    pub fn user_data_path(&self) -> PathBuf {
        self.workspace.join("user-data")
    }

    /// `<workspace>/scripts`
    pub fn scripts_dir(&self) -> PathBuf {
        self.workspace.join("scripts")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("/", DEFAULT_WORKSPACE)
    }
}
