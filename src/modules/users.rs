//! User accounts and their SSH keys

use super::ssh_keys;
use crate::CloudInitError;
use crate::config::UserConfig;
use crate::fetch::Fetcher;
use crate::initialize::Environment;
use crate::system::System;
use tracing::info;

/// Create or update each user, then install their keys
///
/// An existing user only has the password hash reapplied; the remaining
/// account fields only take effect at creation.
pub async fn apply(
    users: &[UserConfig],
    env: &Environment,
    system: &dyn System,
    fetcher: &dyn Fetcher,
) -> Result<(), CloudInitError> {
    for user in users {
        if user.name.is_empty() {
            return Err(CloudInitError::config("user entry without a name"));
        }

        if system.user_exists(&user.name).await? {
            if !user.password_hash.is_empty() {
                info!("Setting password for user {}", user.name);
                system
                    .set_user_password(&user.name, &user.password_hash)
                    .await?;
            }
        } else {
            info!("Creating user {}", user.name);
            system.create_user(user).await?;
        }

        import_keys(user, env, system, fetcher).await?;
    }
    Ok(())
}

async fn import_keys(
    user: &UserConfig,
    env: &Environment,
    system: &dyn System,
    fetcher: &dyn Fetcher,
) -> Result<(), CloudInitError> {
    ssh_keys::authorize(system, &user.name, &env.ssh_key_name, &user.ssh_authorized_keys).await?;

    for github_user in user.github_users() {
        let keys = ssh_keys::github_keys(fetcher, &env.github_api, github_user).await?;
        let key_name = format!("github-{github_user}");
        ssh_keys::authorize(system, &user.name, &key_name, &keys).await?;
    }

    if !user.ssh_import_url.is_empty() {
        let keys = ssh_keys::url_keys(fetcher, &user.ssh_import_url).await?;
        ssh_keys::authorize(system, &user.name, ssh_keys::IMPORT_URL_KEY_NAME, &keys).await?;
    }
    Ok(())
}

/// Install the top-level `ssh_authorized_keys` for the default user
pub async fn authorize_default_user(
    keys: &[String],
    env: &Environment,
    system: &dyn System,
) -> Result<(), CloudInitError> {
    ssh_keys::authorize(system, ssh_keys::DEFAULT_USER, &env.ssh_key_name, keys).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::mock::MockFetcher;
    use crate::system::mock::{Call, CallLog, MockSystem};

    fn env() -> Environment {
        Environment::new("/", "/var/lib/coreos-cloudinit").with_github_api("http://gh.test")
    }

    #[tokio::test]
    async fn test_create_missing_user() {
        let log = CallLog::default();
        let system = MockSystem::new(log.clone());
        let user = UserConfig {
            name: "alice".to_string(),
            password_hash: "$6$x".to_string(),
            ssh_authorized_keys: vec!["ssh-rsa A".to_string()],
            ..Default::default()
        };

        apply(&[user], &env(), &system, &MockFetcher::new()).await.unwrap();
        assert_eq!(
            log.calls(),
            vec![
                Call::CreateUser("alice".to_string()),
                Call::AuthorizeSshKeys {
                    user: "alice".to_string(),
                    key_name: "coreos-cloudinit".to_string(),
                    keys: vec!["ssh-rsa A".to_string()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_user_gets_password_only() {
        let log = CallLog::default();
        let system = MockSystem::new(log.clone()).with_user("core");
        let users = [
            UserConfig {
                name: "core".to_string(),
                password_hash: "$6$y".to_string(),
                ..Default::default()
            },
            UserConfig {
                name: "core".to_string(),
                ..Default::default()
            },
        ];

        apply(&users, &env(), &system, &MockFetcher::new()).await.unwrap();
        assert_eq!(
            log.calls(),
            vec![Call::SetUserPassword {
                name: "core".to_string(),
                hash: "$6$y".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_imported_keys() {
        let log = CallLog::default();
        let system = MockSystem::new(log.clone()).with_user("core");
        let fetcher = MockFetcher::new()
            .with_response("http://gh.test/users/bob/keys", r#"[{"key": "ssh-rsa BOB"}]"#)
            .with_response("http://keys.test/core", "ssh-rsa URL1\nssh-rsa URL2\n");
        let user = UserConfig {
            name: "core".to_string(),
            ssh_import_github_users: vec!["bob".to_string()],
            ssh_import_url: "http://keys.test/core".to_string(),
            ..Default::default()
        };

        apply(&[user], &env(), &system, &fetcher).await.unwrap();
        assert_eq!(
            log.calls(),
            vec![
                Call::AuthorizeSshKeys {
                    user: "core".to_string(),
                    key_name: "github-bob".to_string(),
                    keys: vec!["ssh-rsa BOB".to_string()],
                },
                Call::AuthorizeSshKeys {
                    user: "core".to_string(),
                    key_name: "coreos-ssh-import-url".to_string(),
                    keys: vec!["ssh-rsa URL1".to_string(), "ssh-rsa URL2".to_string()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_default_user_keys() {
        let log = CallLog::default();
        let system = MockSystem::new(log.clone());
        let env = env().with_ssh_key_name("provider");

        authorize_default_user(&["ssh-rsa K".to_string()], &env, &system)
            .await
            .unwrap();
        assert_eq!(
            log.calls(),
            vec![Call::AuthorizeSshKeys {
                user: "core".to_string(),
                key_name: "provider".to_string(),
                keys: vec!["ssh-rsa K".to_string()],
            }]
        );
    }
}
