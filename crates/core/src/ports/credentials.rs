use std::path::PathBuf;

/// Credential kinds the remote accepts for the current attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllowedCredentials {
    pub user_pass: bool,
    pub ssh_key: bool,
    pub default: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    UserPass { username: String, password: String },
    SshAgent { username: String },
    SshKey {
        username: String,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
    /// Platform default (e.g. NTLM/Negotiate)
    Default,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print secrets
        match self {
            Credential::UserPass { username, .. } => {
                f.debug_struct("UserPass").field("username", username).finish_non_exhaustive()
            }
            Credential::SshAgent { username } => {
                f.debug_struct("SshAgent").field("username", username).finish()
            }
            Credential::SshKey {
                username,
                private_key,
                ..
            } => f
                .debug_struct("SshKey")
                .field("username", username)
                .field("private_key", private_key)
                .finish_non_exhaustive(),
            Credential::Default => f.write_str("Default"),
        }
    }
}

/// Port for supplying credentials on demand. May prompt interactively.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(
        &self,
        url: &str,
        username_from_url: Option<&str>,
        allowed: AllowedCredentials,
    ) -> Option<Credential>;

    /// Called before every attempt after the first
    fn should_retry(&self, attempts: usize) -> bool {
        attempts < 3
    }
}

/// Provider for remotes that need no authentication
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialsProvider for NoCredentials {
    fn credentials(&self, _: &str, _: Option<&str>, _: AllowedCredentials) -> Option<Credential> {
        None
    }

    fn should_retry(&self, _attempts: usize) -> bool {
        false
    }
}
