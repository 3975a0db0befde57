//! `KEY=value` environment files
//!
//! Existing lines, comments included, keep their place. Keys being set are
//! rewritten where they first appear and new keys are appended in the
//! order given.

use super::fs::{read_optional, write_file};
use crate::CloudInitError;
use std::collections::HashSet;
use std::path::Path;

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

/// Merge `vars` into the text of an env file
pub fn merge_env(existing: &str, vars: &[(String, String)]) -> String {
    let mut seen = HashSet::new();
    let mut out = String::new();

    for line in existing.lines() {
        match line_key(line).and_then(|key| vars.iter().find(|(k, _)| k == key)) {
            Some((key, value)) => {
                // Later duplicates of a rewritten key are dropped
                if seen.insert(key.as_str()) {
                    out.push_str(&format!("{key}={value}\n"));
                }
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (key, value) in vars {
        if seen.insert(key.as_str()) {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

/// Merge `vars` into the env file at `path`, writing only when bytes change
///
/// Returns whether the file was written.
pub async fn write_env_file(
    path: &Path,
    vars: &[(String, String)],
    mode: u32,
) -> Result<bool, CloudInitError> {
    let existing = read_optional(path).await?.unwrap_or_default();
    let merged = merge_env(&existing, vars);
    write_file(path, merged.as_bytes(), mode).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_preserves_order_and_comments() {
        let old = "# managed\nGROUP=alpha\nSERVER=https://a\nOTHER=1\n";
        let merged = merge_env(old, &vars(&[("SERVER", "https://b"), ("REBOOT_STRATEGY", "off")]));
        assert_eq!(
            merged,
            "# managed\nGROUP=alpha\nSERVER=https://b\nOTHER=1\nREBOOT_STRATEGY=off\n"
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let old = "A=1\nB=2\nA=3\n#A=commented\n";
        let p = vars(&[("A", "9"), ("C", "4")]);
        let once = merge_env(old, &p);
        assert_eq!(once, "A=9\nB=2\n#A=commented\nC=4\n");
        assert_eq!(merge_env(&once, &p), once);
    }

    #[test]
    fn test_merge_into_empty() {
        assert_eq!(merge_env("", &vars(&[("K", "v")])), "K=v\n");
        assert_eq!(merge_env("", &[]), "");
    }

    #[tokio::test]
    async fn test_write_env_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/flannel/options.env");
        let p = vars(&[("FLANNELD_IFACE", "eth1")]);

        assert!(write_env_file(&path, &p, 0o644).await.unwrap());
        assert!(!write_env_file(&path, &p, 0o644).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "FLANNELD_IFACE=eth1\n");
    }
}
