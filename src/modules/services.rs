//! Environment drop-ins for etcd, etcd2, fleet, flannel and locksmith

use super::{Artifacts, EnvFile};
use crate::CloudInitError;
use crate::config::{Etcd, Etcd2, Fleet, Flannel, Locksmith, UnitConfig};
use crate::system::System;
use crate::system::fs::machine_id;
use std::fmt::Write;
use std::path::Path;
use tracing::debug;

/// Environment file flannel reads its options from
pub const FLANNEL_ENV_FILE: &str = "run/flannel/options.env";

/// Runtime drop-in setting `vars` on `service`; `None` when there are none
pub fn environment_drop_in(service: &str, vars: &[(String, String)]) -> Option<UnitConfig> {
    if vars.is_empty() {
        return None;
    }

    let mut content = String::from("[Service]\n");
    for (key, value) in vars {
        writeln!(content, "Environment=\"{}={}\"", key, value).unwrap();
    }

    Some(UnitConfig {
        name: service.to_string(),
        runtime: true,
        drop_in: true,
        content,
        ..Default::default()
    })
}

/// `etcd.service` drop-in
///
/// The legacy `discovery_url` only fills `discovery` when that is unset.
/// A missing `name` defaults to the machine id, then to the hostname.
pub async fn etcd(
    etcd: &Etcd,
    root: &Path,
    system: &dyn System,
) -> Result<Option<UnitConfig>, CloudInitError> {
    if etcd.is_empty() {
        return Ok(None);
    }

    let mut etcd = etcd.clone();
    if etcd.discovery.is_empty() {
        etcd.discovery = std::mem::take(&mut etcd.discovery_url);
    }
    if etcd.name.is_empty() {
        etcd.name = default_name(root, system).await?;
        debug!("Defaulting etcd name to {}", etcd.name);
    }

    Ok(environment_drop_in("etcd.service", &etcd.environment()))
}

async fn default_name(root: &Path, system: &dyn System) -> Result<String, CloudInitError> {
    if let Some(id) = machine_id(root).await? {
        return Ok(id);
    }
    let hostname = system.hostname().await?;
    if hostname.is_empty() {
        return Err(CloudInitError::config(
            "Unable to determine default etcd name",
        ));
    }
    Ok(hostname)
}

/// `etcd2.service` drop-in
pub fn etcd2(etcd2: &Etcd2) -> Option<UnitConfig> {
    environment_drop_in("etcd2.service", &etcd2.environment())
}

/// `fleet.service` drop-in
pub fn fleet(fleet: &Fleet) -> Option<UnitConfig> {
    environment_drop_in("fleet.service", &fleet.environment())
}

/// `flanneld.service` drop-in plus the options env file
pub fn flannel(flannel: &Flannel) -> Artifacts {
    let vars = flannel.environment();
    let mut artifacts = Artifacts::default();
    if let Some(unit) = environment_drop_in("flanneld.service", &vars) {
        artifacts.units.push(unit);
        artifacts.env_files.push(EnvFile {
            path: FLANNEL_ENV_FILE.into(),
            vars,
        });
    }
    artifacts
}

/// `locksmithd.service` drop-in
pub fn locksmith(locksmith: &Locksmith) -> Option<UnitConfig> {
    environment_drop_in("locksmithd.service", &locksmith.environment())
}
