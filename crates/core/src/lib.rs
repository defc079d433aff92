//! gitweave core - serialized git operations and outcome classification
//!
//! This crate holds the domain types, the ports (interfaces) the git engine and the
//! presentation layer implement, and the orchestration core: the listener registry, the
//! single-worker scheduler, the repository session that classifies engine results, and the
//! controller that brackets every call with start/end notifications. It has no dependency
//! on a git library - that lives behind [`ports::VcsEngine`].

pub mod app;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for ergonomics
pub use domain::*;
pub use error::*;
