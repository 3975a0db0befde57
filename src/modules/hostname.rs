//! Hostname

use crate::CloudInitError;
use crate::system::System;
use tracing::info;

/// Set the hostname when one is configured
pub async fn apply(hostname: &str, system: &dyn System) -> Result<(), CloudInitError> {
    if hostname.is_empty() {
        return Ok(());
    }
    info!("Setting hostname to {}", hostname);
    system.set_hostname(hostname).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::{Call, CallLog, MockSystem};

    #[tokio::test]
    async fn test_set_hostname() {
        let log = CallLog::default();
        let system = MockSystem::new(log.clone());

        apply("", &system).await.unwrap();
        assert!(log.calls().is_empty());

        apply("host1", &system).await.unwrap();
        assert_eq!(log.calls(), vec![Call::SetHostname("host1".to_string())]);
        assert_eq!(system.hostname().await.unwrap(), "host1");
    }
}
