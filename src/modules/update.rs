//! Update engine and reboot strategy
//!
//! `update.conf` is rebuilt from the installed file with the configured keys
//! merged in. A reboot strategy restarts locksmithd, or stops and masks it
//! when the strategy is `off`.

use super::{Artifacts, PlacedFile};
use crate::CloudInitError;
use crate::config::{Update, UnitConfig};
use crate::system::env_file::merge_env;
use crate::system::fs::{read_optional, rooted};
use std::path::Path;
use tracing::debug;

pub const UPDATE_CONF: &str = "etc/coreos/update.conf";
/// Shipped defaults, used when the host has no update.conf yet
pub const DEFAULT_UPDATE_CONF: &str = "usr/share/coreos/update.conf";

pub async fn compile(update: &Update, root: &Path) -> Result<Artifacts, CloudInitError> {
    let mut artifacts = Artifacts::default();
    if update.is_empty() {
        return Ok(artifacts);
    }
    update.check()?;

    let base = match read_optional(&rooted(root, UPDATE_CONF)).await? {
        Some(existing) => existing,
        None => {
            debug!("No {UPDATE_CONF}, starting from {DEFAULT_UPDATE_CONF}");
            read_optional(&rooted(root, DEFAULT_UPDATE_CONF))
                .await?
                .unwrap_or_default()
        }
    };
    let content = merge_env(&base, &update.environment());
    artifacts
        .files
        .push(PlacedFile::new(UPDATE_CONF, content, 0o644));

    if !update.reboot_strategy.is_empty() {
        let mut locksmith = UnitConfig {
            name: "locksmithd.service".to_string(),
            runtime: true,
            command: "restart".to_string(),
            ..Default::default()
        };
        if update.reboot_strategy == "off" {
            locksmith.command = "stop".to_string();
            locksmith.mask = true;
        }
        artifacts.units.push(locksmith);
    }

    if !update.group.is_empty() || !update.server.is_empty() {
        artifacts.units.push(UnitConfig {
            name: "update-engine.service".to_string(),
            command: "restart".to_string(),
            ..Default::default()
        });
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn update(strategy: &str, group: &str, server: &str) -> Update {
        Update {
            reboot_strategy: strategy.to_string(),
            group: group.to_string(),
            server: server.to_string(),
        }
    }

    fn file_text(artifacts: &Artifacts) -> String {
        String::from_utf8(artifacts.files[0].content.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_update_section() {
        let dir = TempDir::new().unwrap();
        assert!(compile(&Update::default(), dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merges_existing_update_conf() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc/coreos")).unwrap();
        std::fs::write(
            dir.path().join(UPDATE_CONF),
            "# local\nGROUP=alpha\nSERVER=https://public.update.core-os.net/v1/update/\n",
        )
        .unwrap();

        let artifacts = compile(&update("", "beta", ""), dir.path()).await.unwrap();
        assert_eq!(
            file_text(&artifacts),
            "# local\nGROUP=beta\nSERVER=https://public.update.core-os.net/v1/update/\n"
        );
        assert_eq!(artifacts.units.len(), 1);
        assert_eq!(artifacts.units[0].name, "update-engine.service");
        assert_eq!(artifacts.units[0].command, "restart");
    }

    #[tokio::test]
    async fn test_falls_back_to_shipped_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("usr/share/coreos")).unwrap();
        std::fs::write(dir.path().join(DEFAULT_UPDATE_CONF), "GROUP=stable\n").unwrap();

        let artifacts = compile(&update("best-effort", "", ""), dir.path()).await.unwrap();
        assert_eq!(file_text(&artifacts), "GROUP=stable\nREBOOT_STRATEGY=best-effort\n");
        assert_eq!(artifacts.units[0].name, "locksmithd.service");
        assert_eq!(artifacts.units[0].command, "restart");
        assert!(artifacts.units[0].runtime);
        assert!(!artifacts.units[0].mask);
    }

    #[tokio::test]
    async fn test_strategy_off_masks_locksmith() {
        let dir = TempDir::new().unwrap();
        let artifacts = compile(&update("off", "", ""), dir.path()).await.unwrap();
        assert_eq!(file_text(&artifacts), "REBOOT_STRATEGY=off\n");

        let locksmith = &artifacts.units[0];
        assert_eq!(locksmith.command, "stop");
        assert!(locksmith.mask && locksmith.runtime);
    }

    #[tokio::test]
    async fn test_invalid_strategy() {
        let dir = TempDir::new().unwrap();
        let err = compile(&update("wizzlewazzle", "", ""), dir.path())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid value "wizzlewazzle" for option "RebootStrategy" (valid options: "best-effort,etcd-lock,reboot,off")"#
        );
    }
}
