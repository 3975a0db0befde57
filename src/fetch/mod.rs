//! Remote document retrieval
//!
//! All HTTP goes through the [`Fetcher`] trait so datasources and include
//! URLs can be exercised against a mock.

pub mod mock;

use crate::CloudInitError;
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Retries after the first attempt
pub const MAX_RETRIES: u32 = 15;

/// First backoff step
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Backoff ceiling
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Something that can retrieve a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Delay before retry number `retry` (0-based): `min(2^retry * initial, max)`
pub fn backoff(retry: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    initial.saturating_mul(factor).min(max)
}

/// HTTP fetcher with bounded retries and exponential backoff
///
/// 2xx returns the body, 404 is [`FetchError::NotFound`], other 4xx abort,
/// 5xx and transport errors retry.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, CloudInitError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CloudInitError::Datasource(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        })
    }

    /// Override the retry budget
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the backoff schedule
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>, Attempt> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                Attempt::Abort(FetchError::InvalidUrl {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            } else {
                Attempt::Retry(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| Attempt::Retry(e.to_string()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Attempt::Abort(FetchError::NotFound {
                url: url.to_string(),
            }));
        }
        if status.is_client_error() {
            return Err(Attempt::Abort(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        Err(Attempt::Retry(format!("HTTP {}", status.as_u16())))
    }
}

enum Attempt {
    Abort(FetchError),
    Retry(String),
}

#[async_trait]
impl Fetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut last_error = String::new();
        for retry in 0..=self.max_retries {
            if retry > 0 {
                let delay = backoff(retry - 1, self.initial_backoff, self.max_backoff);
                debug!("Retrying {} in {:?} ({})", url, delay, last_error);
                tokio::time::sleep(delay).await;
            }
            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Abort(err)) => return Err(err),
                Err(Attempt::Retry(message)) => last_error = message,
            }
        }

        warn!("Giving up on {}: {}", url, last_error);
        if self.max_retries == 0 {
            return Err(FetchError::Transport {
                url: url.to_string(),
                message: last_error,
            });
        }
        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.max_retries + 1,
        })
    }
}
