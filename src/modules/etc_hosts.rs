//! `manage_etc_hosts`

use super::PlacedFile;
use crate::CloudInitError;
use crate::system::System;

pub const ETC_HOSTS: &str = "etc/hosts";

/// Map the current hostname to loopback when `manage` is `localhost`
pub async fn compile(
    manage: &str,
    system: &dyn System,
) -> Result<Option<PlacedFile>, CloudInitError> {
    match manage {
        "" => Ok(None),
        "localhost" => {
            let hostname = system.hostname().await?;
            Ok(Some(PlacedFile::new(
                ETC_HOSTS,
                format!("127.0.0.1 {hostname}\n"),
                0o644,
            )))
        }
        _ => Err(CloudInitError::config("Invalid option to manage_etc_hosts")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockSystem;

    #[tokio::test]
    async fn test_localhost() {
        let system = MockSystem::default().with_hostname("node1");
        let file = compile("localhost", &system).await.unwrap().unwrap();
        assert_eq!(file.content, b"127.0.0.1 node1\n");
        assert_eq!(file.mode, 0o644);
    }

    #[tokio::test]
    async fn test_unmanaged_and_invalid() {
        let system = MockSystem::default();
        assert!(compile("", &system).await.unwrap().is_none());

        let err = compile("yes", &system).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid option to manage_etc_hosts");
    }
}
