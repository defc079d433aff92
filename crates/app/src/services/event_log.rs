use gitweave_core::app::OperationListener;
use gitweave_core::domain::EventInfo;
use gitweave_core::error::OperationError;
use tracing::{error, info};

/// Logs every operation notification
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogger;

impl OperationListener for EventLogger {
    fn about_to_start(&self, info: &EventInfo) {
        info!("Starting {}", info);
    }

    fn succeeded(&self, info: &EventInfo) {
        info!("Finished {}", info);
    }

    fn failed(&self, info: &EventInfo, cause: &OperationError) {
        error!("{} failed: {}", info, cause);
    }
}
