//! SSH key import and installation

use crate::CloudInitError;
use crate::fetch::Fetcher;
use crate::system::System;
use serde::Deserialize;
use tracing::{debug, info};

/// Default GitHub API root used for `coreos-ssh-import-github`
pub const GITHUB_API: &str = "https://api.github.com";

/// Key name used for keys imported from `coreos-ssh-import-url`
pub const IMPORT_URL_KEY_NAME: &str = "coreos-ssh-import-url";

/// User that receives the top-level `ssh_authorized_keys`
pub const DEFAULT_USER: &str = "core";

#[derive(Debug, Deserialize)]
struct PublicKey {
    key: String,
}

/// Keys from a JSON `[{"key": ...}]` document or one key per line
pub fn parse_keys(body: &[u8]) -> Result<Vec<String>, CloudInitError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| CloudInitError::parse(format!("SSH keys are not UTF-8: {e}")))?;

    if text.trim_start().starts_with('[') {
        let keys: Vec<PublicKey> = serde_json::from_str(text)?;
        return Ok(keys.into_iter().map(|k| k.key).collect());
    }

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Fetch the public keys of a GitHub account
pub async fn github_keys(
    fetcher: &dyn Fetcher,
    api: &str,
    user: &str,
) -> Result<Vec<String>, CloudInitError> {
    let url = format!("{}/users/{}/keys", api.trim_end_matches('/'), user);
    debug!("Importing SSH keys for GitHub user {} from {}", user, url);
    parse_keys(&fetcher.fetch(&url).await?)
}

/// Fetch keys from an arbitrary URL
pub async fn url_keys(fetcher: &dyn Fetcher, url: &str) -> Result<Vec<String>, CloudInitError> {
    debug!("Importing SSH keys from {}", url);
    parse_keys(&fetcher.fetch(url).await?)
}

/// Install `keys` for `user` under `key_name`, skipping an empty set
pub async fn authorize(
    system: &dyn System,
    user: &str,
    key_name: &str,
    keys: &[String],
) -> Result<(), CloudInitError> {
    if keys.is_empty() {
        return Ok(());
    }
    info!("Authorizing {} SSH keys for {} as {}", keys.len(), user, key_name);
    system.authorize_ssh_keys(user, key_name, keys).await
}
