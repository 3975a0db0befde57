//! Single-pass provisioning
//!
//! Steps run strictly in order:
//! 1. Hostname
//! 2. Users and their keys
//! 3. Top-level SSH keys for the default user
//! 4. `write_files`
//! 5. Service, OEM, hosts and update artifacts
//! 6. Units: write, mask, enable
//! 7. `daemon-reload`
//! 8. networkd files
//! 9. Unit commands, kernel modules, one networkd restart
//! 10. User-data scripts as transient units

pub mod env;
pub mod workspace;

pub use env::Environment;

use crate::CloudInitError;
use crate::config::{CloudConfig, UnitCommand};
use crate::fetch::Fetcher;
use crate::modules::units::{NETWORKD_SERVICE, UnitPlan};
use crate::modules::{compile_sections, hostname, users, write_files};
use crate::network::{self, NETWORKD_DIR, NetworkPlan};
use crate::system::fs::{rooted, write_file};
use crate::system::{InitBus, System};
use crate::userdata::Script;
use tracing::{debug, info};

/// Applies a merged configuration to the host
pub struct Provisioner<'a> {
    env: &'a Environment,
    system: &'a dyn System,
    bus: &'a dyn InitBus,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        env: &'a Environment,
        system: &'a dyn System,
        bus: &'a dyn InitBus,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            env,
            system,
            bus,
            fetcher,
        }
    }

    /// Converge the host onto `config`, then launch `scripts`
    pub async fn apply(&self, config: &CloudConfig, scripts: &[Script]) -> Result<(), CloudInitError> {
        let root = self.env.root.as_path();
        if !self.env.config_root.as_os_str().is_empty() {
            debug!("Datasource config root is {}", self.env.config_root.display());
        }

        // Everything that can be rejected without the host is checked first
        config.assert_valid()?;
        let files = write_files::compile_all(&config.write_files)?;
        UnitPlan::new(&config.coreos.units, &self.env.substitutions)?;
        let network = self.network_plan(config)?;

        hostname::apply(&config.hostname, self.system).await?;
        users::apply(&config.users, self.env, self.system, self.fetcher).await?;
        users::authorize_default_user(&config.ssh_authorized_keys, self.env, self.system).await?;

        for file in &files {
            file.place(root, self.system).await?;
        }

        let artifacts = compile_sections(config, root, self.system).await?;
        for file in &artifacts.files {
            file.place(root, self.system).await?;
        }
        for env_file in &artifacts.env_files {
            env_file.place(root).await?;
        }

        let mut units = artifacts.units;
        units.extend(config.coreos.units.iter().cloned());
        let plan = UnitPlan::new(&units, &self.env.substitutions)?;
        plan.place(root, self.system).await?;
        plan.enable(root, self.bus).await?;

        if !plan.places_nothing() || !network.files.is_empty() {
            info!("Reloading systemd units");
            self.bus.reload().await?;
        }

        for file in &network.files {
            let path = rooted(root, NETWORKD_DIR).join(&file.path);
            write_file(&path, file.content.as_bytes(), 0o644).await?;
        }

        for (command, unit) in &plan.commands {
            info!("Calling unit command {:?} on {:?}", command.as_str(), unit);
            self.bus.run_unit_command(*command, unit).await?;
        }

        for probe in &network.probes {
            info!("Loading kernel module {}", probe.module);
            self.system.modprobe(&probe.module, &probe.params).await?;
        }

        if plan.restart_networkd || !network.files.is_empty() {
            info!("Restarting {}", NETWORKD_SERVICE);
            self.bus
                .run_unit_command(UnitCommand::Restart, NETWORKD_SERVICE)
                .await?;
        }

        self.run_scripts(scripts).await
    }

    fn network_plan(&self, config: &CloudConfig) -> Result<NetworkPlan, CloudInitError> {
        match self.env.netconf {
            Some(kind) => network::convert(kind, &config.network_config),
            None => {
                if !config.network_config.is_none() {
                    debug!("Network config present but no converter selected");
                }
                Ok(NetworkPlan::default())
            }
        }
    }

    async fn run_scripts(&self, scripts: &[Script]) -> Result<(), CloudInitError> {
        for (index, script) in scripts.iter().enumerate() {
            let path = workspace::persist_script(self.env, index, script).await?;
            let unit = workspace::script_unit(index);
            info!("Running user-data script {} as {}", path.display(), unit);
            self.bus.start_transient_unit(&unit, &path).await?;
        }
        Ok(())
    }
}
