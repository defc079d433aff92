pub mod collaborators;
pub mod credentials;
pub mod engine;
pub mod persistence;

// Re-exports
pub use collaborators::*;
pub use credentials::*;
pub use engine::*;
pub use persistence::*;
