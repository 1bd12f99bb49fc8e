use std::sync::Arc;

use tracing::{error, warn};

use crate::log_record::{LogCreateRequest, LogLevel};
use crate::transport::MessagePublisher;

/// Source tag for store failures on the read path.
pub const REPOSITORY_SOURCE: &str = "LOGGER:REPOSITORY";
/// Source tag for cache failures on the read path.
pub const SERVICE_SOURCE: &str = "LOGGER:SERVICE";

/// Records internal faults for operators: a local `error!` plus a FATAL
/// event published onto the ingestion topic, so the service's own faults
/// become queryable log records.
#[derive(Clone)]
pub struct FaultReporter {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl FaultReporter {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Publish a FATAL event describing the failure. Never fails.
    pub fn report(&self, source: &str, detail: &str) {
        error!(source, detail, "Internal fault");

        let event = LogCreateRequest::new(LogLevel::Fatal, source, detail);
        match serde_json::to_vec(&event) {
            Ok(payload) => self.publisher.publish(&self.topic, payload),
            Err(e) => warn!(error = %e, "Failed to encode fault event"),
        }
    }
}
