//! Ingestion processor: turns one raw topic payload into one stored record.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::errors::LoggerError;
use crate::input_validator::validate_create_request;
use crate::log_record::LogCreateRequest;
use crate::log_store::LogStore;
use crate::transport::MessageHandler;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to decode log event: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid log event: {0}")]
    Invalid(#[source] LoggerError),

    #[error("failed to store log event: {0}")]
    Storage(#[source] LoggerError),
}

impl IngestError {
    /// Decode and validation failures never succeed on redelivery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestError::Decode(_) | IngestError::Invalid(_))
    }
}

/// Turns one broker message into one stored record.
pub struct IngestionProcessor {
    store: Arc<dyn LogStore>,
}

impl IngestionProcessor {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Decode, validate and store one event payload.
    pub async fn process_message(&self, payload: &[u8]) -> Result<(), IngestError> {
        let request: LogCreateRequest =
            serde_json::from_slice(payload).map_err(IngestError::Decode)?;
        let record = validate_create_request(&request).map_err(IngestError::Invalid)?;

        self.store
            .create_log(&record)
            .await
            .map_err(IngestError::Storage)?;

        debug!(level = %record.level, source = %record.source, "Ingested log event");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for IngestionProcessor {
    type Error = IngestError;

    async fn handle(&self, payload: &[u8]) -> Result<(), IngestError> {
        self.process_message(payload).await
    }

    fn is_poison(&self, err: &IngestError) -> bool {
        err.is_terminal()
    }
}
