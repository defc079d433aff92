pub mod credentials;
pub mod git;
pub mod integrate;
pub mod persistence;
pub mod prompt;
pub mod remote;

// Re-exports
pub use credentials::EnvCredentials;
pub use git::Git2Engine;
pub use persistence::FileConfigStore;
pub use prompt::{FixedAnswer, LoggingRefresher, StdinConfirmation};
