pub mod controller;
pub mod listeners;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod stub;

// Re-exports
pub use controller::*;
pub use listeners::*;
pub use scheduler::*;
pub use session::*;
