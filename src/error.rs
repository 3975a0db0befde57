//! Error types for coreos-cloudinit

use thiserror::Error;

/// Failure while retrieving a remote document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{url} not found")]
    NotFound { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unable to fetch {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    #[error("invalid URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// A 404 means "absent" for optional metadata attributes
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Main error type for coreos-cloudinit operations
#[derive(Error, Debug)]
pub enum CloudInitError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Init system error: {0}")]
    Init(String),

    #[error("{0}")]
    Config(String),

    #[error("Datasource error: {0}")]
    Datasource(String),

    #[error("No datasource available")]
    NoDatasource,

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command execution failed: {0}")]
    Command(String),
}

impl CloudInitError {
    /// Create a semantic configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Create an init system error
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }

    /// True for fetch failures that only mean "not there"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_not_found())
    }
}
