//! Mock fetcher for testing
//!
//! Serves canned responses by URL and records every request.

use super::Fetcher;
use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`Fetcher`]; unknown URLs are `NotFound`
///
/// # Example
/// ```
/// use coreos_cloudinit::fetch::mock::MockFetcher;
///
/// let fetcher = MockFetcher::new()
///     .with_response("http://example.com/script", "#!/bin/bash\necho hi");
/// ```
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: HashMap<String, Result<Vec<u8>, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`
    pub fn with_response(mut self, url: &str, body: impl AsRef<[u8]>) -> Self {
        self.responses
            .insert(url.to_string(), Ok(body.as_ref().to_vec()));
        self
    }

    /// Fail requests for `url`
    pub fn with_error(mut self, url: &str, error: FetchError) -> Self {
        self.responses.insert(url.to_string(), Err(error));
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotFound { url: url.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetcher() {
        let fetcher = MockFetcher::new()
            .with_response("http://a/x", "body")
            .with_error(
                "http://a/y",
                FetchError::Status {
                    url: "http://a/y".to_string(),
                    status: 500,
                },
            );

        assert_eq!(fetcher.fetch("http://a/x").await.unwrap(), b"body");
        assert!(!fetcher.fetch("http://a/y").await.unwrap_err().is_not_found());
        assert!(fetcher.fetch("http://a/z").await.unwrap_err().is_not_found());
        assert_eq!(fetcher.requests(), vec!["http://a/x", "http://a/y", "http://a/z"]);
    }
}
