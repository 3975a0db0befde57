//! systemd unit placement
//!
//! Units are planned first: which files to write, which names to mask, which
//! to enable and which commands to issue afterwards. A masked name shadows
//! every content and drop-in write for that unit.

use super::PlacedFile;
use crate::CloudInitError;
use crate::config::{UnitCommand, UnitConfig};
use crate::system::fs::{mask, rooted};
use crate::system::{InitBus, System};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Unit restarted once for every network-group change
pub const NETWORKD_SERVICE: &str = "systemd-networkd.service";

/// What placing a list of units involves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitPlan {
    pub files: Vec<PlacedFile>,
    /// Unit paths to point at `/dev/null`
    pub masks: Vec<PathBuf>,
    /// `(unit path, runtime)` to enable
    pub enables: Vec<(PathBuf, bool)>,
    /// Per-unit commands, one per name, in first-seen order
    pub commands: Vec<(UnitCommand, String)>,
    pub restart_networkd: bool,
}

/// Replace `$public_ipv4` style variables; unknown ones stay verbatim
pub fn substitute(content: &str, vars: &BTreeMap<String, String>) -> String {
    vars.iter()
        .fold(content.to_string(), |text, (name, value)| text.replace(name, value))
}

impl UnitPlan {
    pub fn new(units: &[UnitConfig], vars: &BTreeMap<String, String>) -> Result<Self, CloudInitError> {
        let masked: HashSet<&str> = units
            .iter()
            .filter(|u| u.mask)
            .map(|u| u.name.as_str())
            .collect();

        let mut plan = Self::default();
        for unit in units {
            if unit.name.is_empty() {
                return Err(CloudInitError::config("unit without a name"));
            }
            let is_masked = masked.contains(unit.name.as_str());
            let network = unit.group() == "network";

            if unit.mask {
                let path = unit.unit_path();
                if !plan.masks.contains(&path) {
                    plan.masks.push(path);
                }
                plan.restart_networkd |= network;
            }

            let mut wrote = false;
            if is_masked {
                debug!("{} is masked, skipping its content", unit.name);
            } else {
                if !unit.content.is_empty() {
                    plan.files.push(PlacedFile::new(
                        unit.destination(),
                        substitute(&unit.content, vars),
                        0o644,
                    ));
                    wrote = true;
                }
                for drop_in in &unit.drop_ins {
                    if drop_in.name.is_empty() {
                        return Err(CloudInitError::config(format!(
                            "drop-in for {} without a name",
                            unit.name
                        )));
                    }
                    plan.files.push(PlacedFile::new(
                        unit.drop_in_path(&drop_in.file_name()),
                        substitute(&drop_in.content, vars),
                        0o644,
                    ));
                    wrote = true;
                }
                if unit.enable && !network {
                    plan.enables.push((unit.unit_path(), unit.runtime));
                }
            }

            let command = if unit.command.is_empty() {
                wrote.then_some(UnitCommand::Restart)
            } else {
                Some(unit.command.parse::<UnitCommand>()?)
            };
            let Some(command) = command else { continue };

            if network {
                plan.restart_networkd = true;
            } else {
                plan.set_command(command, &unit.name);
            }
        }
        Ok(plan)
    }

    // A later command for the same unit replaces the earlier one
    fn set_command(&mut self, command: UnitCommand, name: &str) {
        match self.commands.iter_mut().find(|(_, unit)| unit == name) {
            Some(entry) => entry.0 = command,
            None => self.commands.push((command, name.to_string())),
        }
    }

    /// True when nothing lands on disk
    pub fn places_nothing(&self) -> bool {
        self.files.is_empty() && self.masks.is_empty()
    }

    /// Write unit files and masks under `root`
    pub async fn place(&self, root: &Path, system: &dyn System) -> Result<(), CloudInitError> {
        for file in &self.files {
            file.place(root, system).await?;
        }
        for path in &self.masks {
            mask(&rooted(root, path)).await?;
        }
        Ok(())
    }

    /// Enable the planned units, each forced so existing links are replaced
    pub async fn enable(&self, root: &Path, bus: &dyn InitBus) -> Result<(), CloudInitError> {
        for (path, runtime) in &self.enables {
            let path = rooted(root, path);
            info!("Enabling unit file {}", path.display());
            bus.enable_unit_files(&[path], *runtime, true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DropInConfig;
    use crate::system::mock::{Call, CallLog, MockInitBus, MockSystem};
    use tempfile::TempDir;

    fn unit(name: &str, content: &str) -> UnitConfig {
        UnitConfig {
            name: name.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_content_defaults_to_restart() {
        let units = [
            unit("foo.service", "[Service]\n"),
            UnitConfig {
                command: "start".to_string(),
                ..unit("bar.service", "")
            },
            unit("idle.service", ""),
        ];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();

        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].path, Path::new("etc/systemd/system/foo.service"));
        assert_eq!(
            plan.commands,
            vec![
                (UnitCommand::Restart, "foo.service".to_string()),
                (UnitCommand::Start, "bar.service".to_string()),
            ]
        );
        assert!(!plan.restart_networkd);
    }

    #[test]
    fn test_network_units_coalesce() {
        let units = [
            unit("10-eth0.network", "[Match]\nName=eth0\n"),
            UnitConfig {
                enable: true,
                ..unit("20-eth1.network", "[Match]\nName=eth1\n")
            },
        ];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();

        assert!(plan.restart_networkd);
        assert!(plan.commands.is_empty());
        assert!(plan.enables.is_empty());
        assert_eq!(plan.files[1].path, Path::new("etc/systemd/network/20-eth1.network"));
    }

    #[test]
    fn test_masked_network_unit_restarts_networkd() {
        let units = [UnitConfig {
            mask: true,
            ..unit("10-x.network", "")
        }];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();

        assert!(plan.restart_networkd);
        assert!(plan.commands.is_empty());
        assert_eq!(plan.masks, vec![PathBuf::from("etc/systemd/network/10-x.network")]);

        let units = [UnitConfig {
            drop_ins: vec![DropInConfig {
                name: "50-mtu".to_string(),
                content: "[Link]\nMTUBytes=9000\n".to_string(),
            }],
            ..unit("10-x.network", "")
        }];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();
        assert!(plan.restart_networkd);
        assert_eq!(
            plan.files[0].path,
            Path::new("etc/systemd/network/10-x.network.d/50-mtu.conf")
        );
    }

    #[test]
    fn test_mask_suppresses_content_and_drop_ins() {
        let units = [
            UnitConfig {
                mask: true,
                runtime: true,
                command: "stop".to_string(),
                ..unit("locksmithd.service", "")
            },
            UnitConfig {
                runtime: true,
                drop_in: true,
                enable: true,
                drop_ins: vec![DropInConfig {
                    name: "10-x".to_string(),
                    content: "[Service]\n".to_string(),
                }],
                ..unit("locksmithd.service", "[Service]\nEnvironment=\"LOCKSMITHD_GROUP=web\"\n")
            },
        ];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();

        assert!(plan.files.is_empty());
        assert!(plan.enables.is_empty());
        assert_eq!(plan.masks, vec![PathBuf::from("run/systemd/system/locksmithd.service")]);
        assert_eq!(plan.commands, vec![(UnitCommand::Stop, "locksmithd.service".to_string())]);
    }

    #[test]
    fn test_drop_ins_and_substitution() {
        let mut vars = BTreeMap::new();
        vars.insert("$public_ipv4".to_string(), "1.2.3.4".to_string());

        let units = [UnitConfig {
            drop_ins: vec![DropInConfig {
                name: "50-opts".to_string(),
                content: "Environment=IP=$public_ipv4 $unknown\n".to_string(),
            }],
            ..unit("docker.service", "ExecStart=/bin/echo $public_ipv4\n")
        }];
        let plan = UnitPlan::new(&units, &vars).unwrap();

        assert_eq!(plan.files[0].content, b"ExecStart=/bin/echo 1.2.3.4\n");
        assert_eq!(
            plan.files[1].path,
            Path::new("etc/systemd/system/docker.service.d/50-opts.conf")
        );
        assert_eq!(plan.files[1].content, b"Environment=IP=1.2.3.4 $unknown\n");
    }

    #[test]
    fn test_invalid_command() {
        let units = [UnitConfig {
            command: "launch".to_string(),
            ..unit("foo.service", "")
        }];
        assert!(UnitPlan::new(&units, &BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_place_and_enable() {
        let dir = TempDir::new().unwrap();
        let log = CallLog::default();
        let units = [
            UnitConfig {
                enable: true,
                runtime: true,
                ..unit("foo.service", "[Unit]\n")
            },
            UnitConfig {
                mask: true,
                ..unit("bar.service", "")
            },
        ];
        let plan = UnitPlan::new(&units, &BTreeMap::new()).unwrap();
        assert!(!plan.places_nothing());

        plan.place(dir.path(), &MockSystem::new(log.clone())).await.unwrap();
        plan.enable(dir.path(), &MockInitBus::new(log.clone())).await.unwrap();

        let unit_file = dir.path().join("run/systemd/system/foo.service");
        assert_eq!(std::fs::read_to_string(&unit_file).unwrap(), "[Unit]\n");
        let masked = dir.path().join("etc/systemd/system/bar.service");
        assert_eq!(std::fs::read_link(masked).unwrap(), Path::new("/dev/null"));
        assert_eq!(
            log.calls(),
            vec![Call::EnableUnitFiles {
                files: vec![unit_file],
                runtime: true,
                force: true,
            }]
        );
    }
}
