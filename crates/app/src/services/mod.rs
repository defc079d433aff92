pub mod app_service;
pub mod event_log;

// Re-exports
pub use app_service::{AppService, CommandReport};
pub use event_log::EventLogger;
