//! coreos-cloudinit library
//!
//! A first-boot provisioning agent. User-data and instance metadata are read
//! from a [`datasources::Datasource`], parsed into a
//! [`config::CloudConfig`], compiled into files and unit actions, and applied
//! to the host in a single ordered pass by [`initialize::Provisioner`].
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`unsafe_code = "forbid"`)
//! - **Compile, then apply**: every section is turned into artifacts before
//!   anything is written, so a rejected config leaves the host untouched
//! - **Narrow host seams**: systemd and account tools sit behind
//!   [`system::InitBus`] and [`system::System`]

pub mod config;
pub mod datasources;
pub mod fetch;
pub mod initialize;
pub mod metadata;
pub mod modules;
pub mod network;
pub mod system;
pub mod userdata;

mod error;

pub use error::{CloudInitError, FetchError};
