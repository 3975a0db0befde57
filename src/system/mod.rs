//! Host collaborators
//!
//! The provisioner only talks to the init system and the account tools
//! through [`InitBus`] and [`System`], so it can run against a recording
//! mock in tests.

pub mod env_file;
pub mod fs;
pub mod mock;

use crate::CloudInitError;
use crate::config::{UnitCommand, UserConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Operations on the init system
#[async_trait]
pub trait InitBus: Send + Sync {
    /// Run `command` (start, stop, restart, ...) on `unit`
    async fn run_unit_command(&self, command: UnitCommand, unit: &str) -> Result<(), CloudInitError>;

    /// Enable unit files given by path
    async fn enable_unit_files(
        &self,
        files: &[PathBuf],
        runtime: bool,
        force: bool,
    ) -> Result<(), CloudInitError>;

    /// Reload unit definitions (`daemon-reload`)
    async fn reload(&self) -> Result<(), CloudInitError>;

    /// Launch `executable` as the transient service `unit`
    async fn start_transient_unit(&self, unit: &str, executable: &Path) -> Result<(), CloudInitError>;
}

/// Operations on the host outside the init system
#[async_trait]
pub trait System: Send + Sync {
    /// Live hostname of the machine
    async fn hostname(&self) -> Result<String, CloudInitError>;

    async fn set_hostname(&self, hostname: &str) -> Result<(), CloudInitError>;

    async fn user_exists(&self, name: &str) -> Result<bool, CloudInitError>;

    async fn create_user(&self, user: &UserConfig) -> Result<(), CloudInitError>;

    /// Set an already hashed password
    async fn set_user_password(&self, name: &str, hash: &str) -> Result<(), CloudInitError>;

    /// Install `keys` for `user` under `key_name`
    async fn authorize_ssh_keys(
        &self,
        user: &str,
        key_name: &str,
        keys: &[String],
    ) -> Result<(), CloudInitError>;

    /// Load a kernel module
    async fn modprobe(&self, module: &str, params: &[String]) -> Result<(), CloudInitError>;

    /// Change ownership of `path` to `owner` (`user[:group]`)
    async fn chown(&self, path: &Path, owner: &str) -> Result<(), CloudInitError>;
}

/// Run a program to completion, failing on a non-zero exit
async fn run(program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<(), CloudInitError> {
    debug!("Running {} {}", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| CloudInitError::Command(format!("{program}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CloudInitError::Command(format!("{program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CloudInitError::Command(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(())
}

/// [`InitBus`] backed by `systemctl` and `systemd-run`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemctlBus;

#[async_trait]
impl InitBus for SystemctlBus {
    async fn run_unit_command(&self, command: UnitCommand, unit: &str) -> Result<(), CloudInitError> {
        info!("Calling {} on {}", command, unit);
        run("systemctl", &[command.as_str(), unit], None)
            .await
            .map_err(|e| CloudInitError::init(e.to_string()))
    }

    async fn enable_unit_files(
        &self,
        files: &[PathBuf],
        runtime: bool,
        force: bool,
    ) -> Result<(), CloudInitError> {
        let mut args = vec!["enable".to_string()];
        if runtime {
            args.push("--runtime".to_string());
        }
        if force {
            args.push("--force".to_string());
        }
        args.extend(files.iter().map(|f| f.display().to_string()));

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run("systemctl", &args, None)
            .await
            .map_err(|e| CloudInitError::init(e.to_string()))
    }

    async fn reload(&self) -> Result<(), CloudInitError> {
        info!("Calling daemon-reload");
        run("systemctl", &["daemon-reload"], None)
            .await
            .map_err(|e| CloudInitError::init(e.to_string()))
    }

    async fn start_transient_unit(&self, unit: &str, executable: &Path) -> Result<(), CloudInitError> {
        info!("Starting {} as {}", executable.display(), unit);
        let unit_arg = format!("--unit={unit}");
        let executable = executable.display().to_string();
        run("systemd-run", &[&unit_arg, &executable], None)
            .await
            .map_err(|e| CloudInitError::init(e.to_string()))
    }
}

/// [`System`] backed by the host's account and network tools
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

#[async_trait]
impl System for HostSystem {
    async fn hostname(&self) -> Result<String, CloudInitError> {
        Ok(hostname::get()?.to_string_lossy().into_owned())
    }

    async fn set_hostname(&self, hostname: &str) -> Result<(), CloudInitError> {
        info!("Setting hostname to {}", hostname);
        run("hostnamectl", &["set-hostname", hostname], None).await
    }

    async fn user_exists(&self, name: &str) -> Result<bool, CloudInitError> {
        let status = Command::new("getent")
            .args(["passwd", name])
            .stdout(Stdio::null())
            .status()
            .await
            .map_err(|e| CloudInitError::Command(format!("getent: {e}")))?;
        Ok(status.success())
    }

    async fn create_user(&self, user: &UserConfig) -> Result<(), CloudInitError> {
        info!("Creating user {}", user.name);
        let args = useradd_args(user);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run("useradd", &args, None).await?;

        if user.lock_passwd {
            run("usermod", &["--lock", &user.name], None).await?;
        }
        Ok(())
    }

    async fn set_user_password(&self, name: &str, hash: &str) -> Result<(), CloudInitError> {
        info!("Setting password for {}", name);
        let input = format!("{name}:{hash}\n");
        run("chpasswd", &["-e"], Some(input.as_bytes())).await
    }

    async fn authorize_ssh_keys(
        &self,
        user: &str,
        key_name: &str,
        keys: &[String],
    ) -> Result<(), CloudInitError> {
        info!("Authorizing {} SSH keys for {} as {}", keys.len(), user, key_name);
        let mut input = keys.join("\n");
        input.push('\n');
        run("update-ssh-keys", &["-u", user, "-a", key_name], Some(input.as_bytes())).await
    }

    async fn modprobe(&self, module: &str, params: &[String]) -> Result<(), CloudInitError> {
        info!("Loading kernel module {}", module);
        let mut args = vec![module];
        args.extend(params.iter().map(String::as_str));
        run("modprobe", &args, None).await
    }

    async fn chown(&self, path: &Path, owner: &str) -> Result<(), CloudInitError> {
        debug!("Changing owner of {} to {}", path.display(), owner);
        let path = path.display().to_string();
        run("chown", &[owner, &path], None).await
    }
}

/// `useradd` arguments for a user entry
pub fn useradd_args(user: &UserConfig) -> Vec<String> {
    let mut args = Vec::new();
    let mut flag = |name: &str, value: &str| {
        if !value.is_empty() {
            args.push(name.to_string());
            args.push(value.to_string());
        }
    };
    flag("--password", &user.password_hash);
    flag("--comment", &user.gecos);
    flag("--home-dir", &user.homedir);
    flag("--gid", &user.primary_group);
    flag("--groups", &user.groups.join(","));
    flag("--shell", &user.shell);

    args.push(if user.no_create_home { "--no-create-home" } else { "--create-home" }.to_string());
    if user.no_user_group {
        args.push("--no-user-group".to_string());
    }
    if user.system {
        args.push("--system".to_string());
    }
    if user.no_log_init {
        args.push("--no-log-init".to_string());
    }
    args.push(user.name.clone());
    args
}
