//! Sources of user-data and instance metadata
//!
//! Every provider maps its own layout onto the same [`Datasource`]
//! capabilities. Selection polls the configured sources until one reports
//! itself available.

pub mod cloudsigma;
pub mod configdrive;
pub mod digitalocean;
pub mod ec2;
pub mod file;
pub mod mock;
pub mod proc_cmdline;
pub mod url;
pub mod vmware;
pub mod waagent;

use crate::CloudInitError;
use crate::fetch::{INITIAL_BACKOFF, MAX_BACKOFF, backoff};
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A provider of user-data and metadata
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the source can be read right now
    async fn is_available(&self) -> bool;

    /// Whether an unavailable source may still become available
    fn availability_changes(&self) -> bool;

    /// Root of the source's files or URLs, empty when meaningless
    fn config_root(&self) -> String {
        String::new()
    }

    /// Instance metadata; fields the source does not carry stay empty
    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError>;

    /// Raw user-data, empty when none was supplied
    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError>;
}

/// Poll `sources` in order until one is available or `timeout` passes
///
/// Sources whose availability cannot change are only asked once.
pub async fn select_datasource(
    sources: Vec<Box<dyn Datasource>>,
    timeout: Duration,
) -> Result<Box<dyn Datasource>, CloudInitError> {
    let deadline = Instant::now() + timeout;
    let mut pending = sources;
    let mut round = 0;

    loop {
        let mut waiting = Vec::new();
        for source in pending {
            debug!("Checking availability of {}", source.name());
            if source.is_available().await {
                info!("Using {} datasource", source.name());
                return Ok(source);
            }
            if source.availability_changes() {
                waiting.push(source);
            }
        }

        if waiting.is_empty() || Instant::now() >= deadline {
            return Err(CloudInitError::NoDatasource);
        }

        let delay = backoff(round, INITIAL_BACKOFF, MAX_BACKOFF)
            .min(deadline.saturating_duration_since(Instant::now()));
        debug!("No datasource available yet, retrying in {:?}", delay);
        tokio::time::sleep(delay).await;
        pending = waiting;
        round += 1;
    }
}


impl std::fmt::Debug for dyn Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource").field("name", &self.name()).finish()
    }
}
