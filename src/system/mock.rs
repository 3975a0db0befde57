//! Recording init bus and host for testing
//!
//! Every call is appended to a shared log so tests can assert on exactly
//! what the provisioner asked the host to do, and in which order.

use super::{InitBus, System};
use crate::CloudInitError;
use crate::config::{UnitCommand, UserConfig};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One recorded host interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UnitCommand { command: UnitCommand, unit: String },
    EnableUnitFiles { files: Vec<PathBuf>, runtime: bool, force: bool },
    Reload,
    StartTransientUnit { unit: String, executable: PathBuf },
    SetHostname(String),
    CreateUser(String),
    SetUserPassword { name: String, hash: String },
    AuthorizeSshKeys { user: String, key_name: String, keys: Vec<String> },
    Modprobe { module: String, params: Vec<String> },
    Chown { path: PathBuf, owner: String },
}

impl Call {
    /// True for calls that go to the init system
    pub fn is_init_call(&self) -> bool {
        matches!(
            self,
            Self::UnitCommand { .. }
                | Self::EnableUnitFiles { .. }
                | Self::Reload
                | Self::StartTransientUnit { .. }
        )
    }
}

/// Shared, ordered call log
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(call);
        }
    }

    /// All calls so far
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

/// Recording [`InitBus`]
///
/// # Example
/// ```
/// use coreos_cloudinit::system::mock::{CallLog, MockInitBus};
///
/// let log = CallLog::default();
/// let bus = MockInitBus::new(log.clone());
/// assert!(log.calls().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockInitBus {
    log: CallLog,
    failing_unit: Option<String>,
}

impl MockInitBus {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failing_unit: None,
        }
    }

    /// Fail any command issued on `unit`
    pub fn with_failing_unit(mut self, unit: &str) -> Self {
        self.failing_unit = Some(unit.to_string());
        self
    }
}

#[async_trait]
impl InitBus for MockInitBus {
    async fn run_unit_command(&self, command: UnitCommand, unit: &str) -> Result<(), CloudInitError> {
        self.log.push(Call::UnitCommand {
            command,
            unit: unit.to_string(),
        });
        if self.failing_unit.as_deref() == Some(unit) {
            return Err(CloudInitError::init(format!("{command} {unit} failed")));
        }
        Ok(())
    }

    async fn enable_unit_files(
        &self,
        files: &[PathBuf],
        runtime: bool,
        force: bool,
    ) -> Result<(), CloudInitError> {
        self.log.push(Call::EnableUnitFiles {
            files: files.to_vec(),
            runtime,
            force,
        });
        Ok(())
    }

    async fn reload(&self) -> Result<(), CloudInitError> {
        self.log.push(Call::Reload);
        Ok(())
    }

    async fn start_transient_unit(&self, unit: &str, executable: &Path) -> Result<(), CloudInitError> {
        self.log.push(Call::StartTransientUnit {
            unit: unit.to_string(),
            executable: executable.to_path_buf(),
        });
        Ok(())
    }
}

/// Recording [`System`] with an in-memory hostname and user table
#[derive(Debug, Clone, Default)]
pub struct MockSystem {
    log: CallLog,
    hostname: Arc<Mutex<String>>,
    users: Arc<Mutex<BTreeSet<String>>>,
}

impl MockSystem {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// Start with this live hostname
    pub fn with_hostname(self, hostname: &str) -> Self {
        if let Ok(mut current) = self.hostname.lock() {
            *current = hostname.to_string();
        }
        self
    }

    /// Start with `name` already present
    pub fn with_user(self, name: &str) -> Self {
        if let Ok(mut users) = self.users.lock() {
            users.insert(name.to_string());
        }
        self
    }
}

#[async_trait]
impl System for MockSystem {
    async fn hostname(&self) -> Result<String, CloudInitError> {
        Ok(self.hostname.lock().map(|h| h.clone()).unwrap_or_default())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), CloudInitError> {
        self.log.push(Call::SetHostname(hostname.to_string()));
        if let Ok(mut current) = self.hostname.lock() {
            *current = hostname.to_string();
        }
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool, CloudInitError> {
        Ok(self.users.lock().is_ok_and(|u| u.contains(name)))
    }

    async fn create_user(&self, user: &UserConfig) -> Result<(), CloudInitError> {
        self.log.push(Call::CreateUser(user.name.clone()));
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.name.clone());
        }
        Ok(())
    }

    async fn set_user_password(&self, name: &str, hash: &str) -> Result<(), CloudInitError> {
        self.log.push(Call::SetUserPassword {
            name: name.to_string(),
            hash: hash.to_string(),
        });
        Ok(())
    }

    async fn authorize_ssh_keys(
        &self,
        user: &str,
        key_name: &str,
        keys: &[String],
    ) -> Result<(), CloudInitError> {
        self.log.push(Call::AuthorizeSshKeys {
            user: user.to_string(),
            key_name: key_name.to_string(),
            keys: keys.to_vec(),
        });
        Ok(())
    }

    async fn modprobe(&self, module: &str, params: &[String]) -> Result<(), CloudInitError> {
        self.log.push(Call::Modprobe {
            module: module.to_string(),
            params: params.to_vec(),
        });
        Ok(())
    }

    async fn chown(&self, path: &Path, owner: &str) -> Result<(), CloudInitError> {
        self.log.push(Call::Chown {
            path: path.to_path_buf(),
            owner: owner.to_string(),
        });
        Ok(())
    }
}
