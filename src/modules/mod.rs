//! Configuration-to-artifact compilers
//!
//! Each section of a cloud-config compiles independently into files,
//! environment files and units. Nothing here touches the host until the
//! provisioner writes the collected [`Artifacts`].

pub mod etc_hosts;
pub mod hostname;
pub mod oem;
pub mod services;
pub mod ssh_keys;
pub mod units;
pub mod update;
pub mod users;
pub mod write_files;

use crate::CloudInitError;
use crate::config::{CloudConfig, UnitConfig};
use crate::system::System;
use crate::system::env_file::write_env_file;
use crate::system::fs::{rooted, write_file};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file to place, path relative to the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
    pub mode: u32,
    /// `user[:group]`, empty to keep the writer's ownership
    pub owner: String,
}

impl PlacedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode,
            owner: String::new(),
        }
    }

    /// Write under `root` and apply the owner
    pub async fn place(&self, root: &Path, system: &dyn System) -> Result<PathBuf, CloudInitError> {
        let path = rooted(root, &self.path);
        write_file(&path, &self.content, self.mode).await?;
        if !self.owner.is_empty() {
            system.chown(&path, &self.owner).await?;
        }
        Ok(path)
    }
}

/// Variables merged into an existing `KEY=value` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFile {
    pub path: PathBuf,
    pub vars: Vec<(String, String)>,
}

impl EnvFile {
    pub async fn place(&self, root: &Path) -> Result<PathBuf, CloudInitError> {
        let path = rooted(root, &self.path);
        write_env_file(&path, &self.vars, 0o644).await?;
        Ok(path)
    }
}

/// What the section compilers produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub files: Vec<PlacedFile>,
    pub env_files: Vec<EnvFile>,
    pub units: Vec<UnitConfig>,
}

impl Artifacts {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.env_files.is_empty() && self.units.is_empty()
    }

    pub fn extend(&mut self, other: Artifacts) {
        self.files.extend(other.files);
        self.env_files.extend(other.env_files);
        self.units.extend(other.units);
    }
}

/// Compile the service, OEM, hosts and update sections
///
/// Everything is computed before anything is placed, so a failing section
/// leaves the host untouched.
pub async fn compile_sections(
    config: &CloudConfig,
    root: &Path,
    system: &dyn System,
) -> Result<Artifacts, CloudInitError> {
    let coreos = &config.coreos;
    let mut artifacts = Artifacts::default();

    artifacts.units.extend(services::etcd(&coreos.etcd, root, system).await?);
    artifacts.units.extend(services::etcd2(&coreos.etcd2));
    artifacts.units.extend(services::fleet(&coreos.fleet));
    artifacts.extend(services::flannel(&coreos.flannel));
    artifacts.files.extend(oem::compile(&coreos.oem));
    artifacts
        .files
        .extend(etc_hosts::compile(&config.manage_etc_hosts, system).await?);
    artifacts.extend(update::compile(&coreos.update, root).await?);
    artifacts.units.extend(services::locksmith(&coreos.locksmith));

    debug!(
        "Sections produced {} files, {} env files and {} units",
        artifacts.files.len(),
        artifacts.env_files.len(),
        artifacts.units.len()
    );
    Ok(artifacts)
}
