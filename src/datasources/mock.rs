//! Mock datasource for testing

use super::Datasource;
use crate::CloudInitError;
use crate::metadata::Metadata;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configurable in-memory datasource
///
/// # Example
/// ```
/// use coreos_cloudinit::datasources::mock::MockDatasource;
/// use coreos_cloudinit::metadata::Metadata;
///
/// let mock = MockDatasource::new()
///     .with_userdata("#cloud-config\nhostname: test\n")
///     .with_metadata(Metadata {
///         hostname: "meta".to_string(),
///         ..Default::default()
///     });
/// ```
#[derive(Debug)]
pub struct MockDatasource {
    name: &'static str,
    available: bool,
    availability_changes: bool,
    /// Number of availability checks to fail before succeeding
    available_after: usize,
    checks: AtomicUsize,
    config_root: String,
    metadata: Metadata,
    userdata: Vec<u8>,
    metadata_error: Option<String>,
    userdata_error: Option<String>,
}

impl MockDatasource {
    pub fn new() -> Self {
        Self {
            name: "mock",
            available: true,
            availability_changes: true,
            available_after: 0,
            checks: AtomicUsize::new(0),
            config_root: String::new(),
            metadata: Metadata::default(),
            userdata: Vec::new(),
            metadata_error: None,
            userdata_error: None,
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_availability_changes(mut self, changes: bool) -> Self {
        self.availability_changes = changes;
        self
    }

    /// Report unavailable for the first `checks` polls
    pub fn with_available_after(mut self, checks: usize) -> Self {
        self.available_after = checks;
        self
    }

    pub fn with_config_root(mut self, root: &str) -> Self {
        self.config_root = root.to_string();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_userdata(mut self, userdata: impl AsRef<[u8]>) -> Self {
        self.userdata = userdata.as_ref().to_vec();
        self
    }

    pub fn with_metadata_error(mut self, error: &str) -> Self {
        self.metadata_error = Some(error.to_string());
        self
    }

    pub fn with_userdata_error(mut self, error: &str) -> Self {
        self.userdata_error = Some(error.to_string());
        self
    }
}

impl Default for MockDatasource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datasource for MockDatasource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn is_available(&self) -> bool {
        let checks = self.checks.fetch_add(1, Ordering::SeqCst);
        self.available && checks >= self.available_after
    }

    fn availability_changes(&self) -> bool {
        self.availability_changes
    }

    fn config_root(&self) -> String {
        self.config_root.clone()
    }

    async fn fetch_metadata(&self) -> Result<Metadata, CloudInitError> {
        if let Some(error) = &self.metadata_error {
            return Err(CloudInitError::Datasource(error.clone()));
        }
        Ok(self.metadata.clone())
    }

    async fn fetch_userdata(&self) -> Result<Vec<u8>, CloudInitError> {
        if let Some(error) = &self.userdata_error {
            return Err(CloudInitError::Datasource(error.clone()));
        }
        Ok(self.userdata.clone())
    }
}
