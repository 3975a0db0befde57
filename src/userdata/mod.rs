//! User-data parsing and processing
//!
//! Handles parsing of user-data in various formats:
//! - Cloud-config YAML
//! - Executable scripts
//! - MIME multipart messages, including `text/x-include-url` parts
//! - Gzip compressed data

pub mod mime;
pub mod types;

pub use mime::MimePart;
pub use types::ContentType;

use crate::config::{CLOUD_CONFIG_HEADER, CloudConfig, gunzip};
use crate::fetch::Fetcher;
use crate::CloudInitError;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Include and multipart nesting limit
const MAX_DEPTH: usize = 10;

/// An executable user-data script, kept byte for byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self(content.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Parsed user-data
#[derive(Debug, Clone, PartialEq)]
pub enum UserData {
    /// Executable script (`#!`)
    Script(Script),
    /// Cloud-config YAML
    CloudConfig(Box<CloudConfig>),
    /// Multi-part MIME, flattened
    MultiPart(Vec<UserData>),
    /// No user data
    None,
}

impl UserData {
    /// Split into cloud-configs and scripts, in document order
    pub fn into_parts(self) -> (Vec<CloudConfig>, Vec<Script>) {
        let mut configs = Vec::new();
        let mut scripts = Vec::new();
        self.collect_into(&mut configs, &mut scripts);
        (configs, scripts)
    }

    fn collect_into(self, configs: &mut Vec<CloudConfig>, scripts: &mut Vec<Script>) {
        match self {
            Self::Script(script) => scripts.push(script),
            Self::CloudConfig(config) => configs.push(*config),
            Self::MultiPart(parts) => {
                for part in parts {
                    part.collect_into(configs, scripts);
                }
            }
            Self::None => {}
        }
    }
}

type ParseFuture<'a> = Pin<Box<dyn Future<Output = Result<UserData, CloudInitError>> + Send + 'a>>;

/// Parse raw user-data bytes into structured UserData
///
/// Include URLs are retrieved through `fetcher` and parsed recursively.
///
/// # Example
/// ```
/// use coreos_cloudinit::fetch::mock::MockFetcher;
/// use coreos_cloudinit::userdata::{UserData, parse_userdata};
///
/// let parsed = tokio_test::block_on(parse_userdata(b"#!/bin/sh\necho hi\n", &MockFetcher::new()));
/// assert!(matches!(parsed, Ok(UserData::Script(_))));
/// ```
pub async fn parse_userdata(data: &[u8], fetcher: &dyn Fetcher) -> Result<UserData, CloudInitError> {
    parse(data, fetcher, 0).await
}

fn parse<'a>(data: &'a [u8], fetcher: &'a dyn Fetcher, depth: usize) -> ParseFuture<'a> {
    Box::pin(async move {
        if depth > MAX_DEPTH {
            return Err(CloudInitError::parse("user-data nested too deeply"));
        }

        let data = decompress_if_needed(data)?;
        let text = String::from_utf8_lossy(&data);
        let Some(header) = text.trim_start().lines().next() else {
            return Ok(UserData::None);
        };
        let header = header.trim_end_matches('\r');

        if header.starts_with("#!") {
            debug!("Detected script user-data");
            return Ok(UserData::Script(Script::new(data.into_owned())));
        }
        if header == CLOUD_CONFIG_HEADER {
            debug!("Detected cloud-config user-data");
            let config = CloudConfig::from_yaml(&text)?;
            return Ok(UserData::CloudConfig(Box::new(config)));
        }
        if let Some(content_type) = mime::message_content_type(&text)
            && types::media_type(&content_type).starts_with("multipart/")
        {
            debug!("Detected multipart user-data");
            let parts = mime::parse_multipart(&content_type, mime::message_body(&text))?;
            return parse_parts(parts, fetcher, depth).await;
        }

        Err(CloudInitError::parse("Unrecognized user-data header"))
    })
}

fn parse_parts<'a>(parts: Vec<MimePart>, fetcher: &'a dyn Fetcher, depth: usize) -> ParseFuture<'a> {
    Box::pin(async move {
        let mut collected = Vec::new();

        for part in parts {
            debug!("Processing {} part ({})", part.content_type, part.mime_type);
            match part.content_type {
                ContentType::Script => {
                    push_part(&mut collected, UserData::Script(Script::new(part.body)));
                }
                ContentType::CloudConfig => {
                    let config = CloudConfig::from_yaml(&String::from_utf8_lossy(&part.body))?;
                    push_part(&mut collected, UserData::CloudConfig(Box::new(config)));
                }
                ContentType::Plain => {
                    let parsed = parse(&part.body, fetcher, depth + 1).await?;
                    push_part(&mut collected, parsed);
                }
                ContentType::IncludeUrl => {
                    for url in include_urls(&String::from_utf8_lossy(&part.body)) {
                        debug!("Fetching included user-data from {}", url);
                        let body = fetcher.fetch(&url).await?;
                        let parsed = parse(&body, fetcher, depth + 1).await?;
                        push_part(&mut collected, parsed);
                    }
                }
                ContentType::Multipart => {
                    let body = String::from_utf8_lossy(&part.body);
                    let nested = mime::parse_multipart(&part.mime_type, &body)?;
                    let parsed = parse_parts(nested, fetcher, depth + 1).await?;
                    push_part(&mut collected, parsed);
                }
                ContentType::Unknown => {
                    warn!("Ignoring user-data part of type {}", part.mime_type);
                }
            }
        }

        Ok(UserData::MultiPart(collected))
    })
}

/// Append to a multipart result, flattening and dropping repeated scripts
fn push_part(collected: &mut Vec<UserData>, part: UserData) {
    match part {
        UserData::None => {}
        UserData::MultiPart(parts) => {
            for part in parts {
                push_part(collected, part);
            }
        }
        UserData::Script(script) => {
            let seen = collected
                .iter()
                .any(|p| matches!(p, UserData::Script(s) if *s == script));
            if seen {
                debug!("Dropping repeated script");
            } else {
                collected.push(UserData::Script(script));
            }
        }
        other => collected.push(other),
    }
}

/// URLs listed in an include part
fn include_urls(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Decompress gzip data if needed
fn decompress_if_needed(data: &[u8]) -> Result<Cow<'_, [u8]>, CloudInitError> {
    if data.starts_with(&[0x1f, 0x8b]) {
        debug!("Decompressing gzip user-data");
        Ok(Cow::Owned(gunzip(data)?))
    } else {
        Ok(Cow::Borrowed(data))
    }
}
