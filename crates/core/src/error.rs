use thiserror::Error;

/// Errors crossing the scheduler and controller boundary.
///
/// Conflicts, rejections and other expected divergence are reported through the
/// outcome types in [`crate::domain::outcome`]; only genuine faults end up here.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("No repository is open")]
    NoRepository,

    #[error("Invalid repository state: {reason}")]
    InvalidState { reason: String },

    #[error("Operation was cancelled before it started")]
    Cancelled,

    #[error("Operation panicked: {message}")]
    Panicked { message: String },

    #[error("Engine error: {source}")]
    Engine {
        #[from]
        source: anyhow::Error,
    },
}

impl OperationError {
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Builds a `Panicked` error from a `catch_unwind` payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
