use async_trait::async_trait;

use crate::errors::LoggerResult;
use crate::log_record::{LogFilter, LogRecord, NewLogRecord, PaginatedResult, Pagination};

/// Persistent store for log records: the storage writer used by ingestion and
/// the storage reader behind the cached query service.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert one record and read it back to confirm what was persisted.
    async fn create_log(&self, record: &NewLogRecord) -> LoggerResult<()>;

    /// One page of records matching `filter`, plus the filtered total.
    async fn query_logs(
        &self,
        filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>>;
}
