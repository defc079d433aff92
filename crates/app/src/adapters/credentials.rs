use git2::Cred;
use gitweave_core::ports::{AllowedCredentials, Credential, CredentialsProvider};
use std::path::PathBuf;
use tracing::debug;

pub const USERNAME_VAR: &str = "GITWEAVE_USERNAME";
pub const PASSWORD_VAR: &str = "GITWEAVE_PASSWORD";
pub const SSH_KEY_VAR: &str = "GITWEAVE_SSH_KEY";

/// Converts a provider answer into the git2 credential object.
pub fn to_git_credential(credential: Credential) -> Result<Cred, git2::Error> {
    match credential {
        Credential::UserPass { username, password } => {
            Cred::userpass_plaintext(&username, &password)
        }
        Credential::SshAgent { username } => Cred::ssh_key_from_agent(&username),
        Credential::SshKey {
            username,
            private_key,
            passphrase,
        } => Cred::ssh_key(&username, None, &private_key, passphrase.as_deref()),
        Credential::Default => Cred::default(),
    }
}

/// Credentials from `GITWEAVE_*` environment variables, falling back to the SSH agent
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    username: Option<String>,
    password: Option<String>,
    ssh_key: Option<PathBuf>,
}

impl EnvCredentials {
    pub fn new(username: Option<String>, password: Option<String>, ssh_key: Option<PathBuf>) -> Self {
        Self {
            username,
            password,
            ssh_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var(USERNAME_VAR).ok(),
            std::env::var(PASSWORD_VAR).ok(),
            std::env::var(SSH_KEY_VAR).ok().map(PathBuf::from),
        )
    }
}

impl CredentialsProvider for EnvCredentials {
    fn credentials(
        &self,
        url: &str,
        username_from_url: Option<&str>,
        allowed: AllowedCredentials,
    ) -> Option<Credential> {
        if allowed.ssh_key {
            let username = username_from_url
                .map(str::to_string)
                .or_else(|| self.username.clone())
                .unwrap_or_else(|| "git".to_string());
            return Some(match &self.ssh_key {
                Some(private_key) => Credential::SshKey {
                    username,
                    private_key: private_key.clone(),
                    passphrase: self.password.clone(),
                },
                None => Credential::SshAgent { username },
            });
        }
        if allowed.user_pass {
            if let (Some(username), Some(password)) = (&self.username, &self.password) {
                return Some(Credential::UserPass {
                    username: username.clone(),
                    password: password.clone(),
                });
            }
        }
        if allowed.default {
            return Some(Credential::Default);
        }
        debug!("No usable credentials for {}", url);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(user_pass: bool, ssh_key: bool) -> AllowedCredentials {
        AllowedCredentials {
            user_pass,
            ssh_key,
            default: false,
        }
    }

    #[test]
    fn test_ssh_prefers_url_username_and_agent() {
        let creds = EnvCredentials::new(Some("env-user".to_string()), None, None);
        let answer = creds.credentials("ssh://host/repo", Some("git"), allowed(false, true));
        assert_eq!(
            answer,
            Some(Credential::SshAgent {
                username: "git".to_string()
            })
        );
    }

    #[test]
    fn test_ssh_key_from_env_uses_password_as_passphrase() {
        let creds = EnvCredentials::new(
            Some("me".to_string()),
            Some("secret".to_string()),
            Some(PathBuf::from("/keys/id_ed25519")),
        );
        match creds.credentials("ssh://host/repo", None, allowed(false, true)) {
            Some(Credential::SshKey {
                username,
                private_key,
                passphrase,
            }) => {
                assert_eq!(username, "me");
                assert_eq!(private_key, PathBuf::from("/keys/id_ed25519"));
                assert_eq!(passphrase.as_deref(), Some("secret"));
            }
            other => panic!("unexpected credential: {:?}", other),
        }
    }

    #[test]
    fn test_user_pass_requires_both_values() {
        let partial = EnvCredentials::new(Some("me".to_string()), None, None);
        assert_eq!(
            partial.credentials("https://host/repo", None, allowed(true, false)),
            None
        );

        let full = EnvCredentials::new(Some("me".to_string()), Some("pw".to_string()), None);
        assert!(matches!(
            full.credentials("https://host/repo", None, allowed(true, false)),
            Some(Credential::UserPass { .. })
        ));
    }

    #[test]
    fn test_provider_retry_limit() {
        let creds = EnvCredentials::default();
        assert!(creds.should_retry(2));
        assert!(!creds.should_retry(3));
    }
}
