//! Cache-aside read path.
//!
//! Results are cached for [`CACHE_TTL`] under a key derived from the filter
//! and pagination. Nothing invalidates entries on write, so a reader may see
//! data up to one TTL old.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache_store::CacheStore;
use crate::errors::{LoggerError, LoggerResult};
use crate::fault_report::{FaultReporter, REPOSITORY_SOURCE, SERVICE_SOURCE};
use crate::log_record::{LogFilter, LogRecord, PaginatedResult, Pagination};
use crate::log_store::LogStore;

/// Upper bound on how stale a cached page may be.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// `logs_<levels joined by '_'><from_to>_<limit>_<row offset>`.
///
/// Level order is significant: `[info, error]` and `[error, info]` produce
/// different keys.
pub fn cache_key(filter: &LogFilter, pagination: &Pagination) -> String {
    let mut sort_key = filter.level_filter.join("_");
    if let Some(range) = &filter.date_filter {
        sort_key.push_str(&format!("{}_{}", range.from, range.to));
    }
    format!(
        "logs_{}_{}_{}",
        sort_key,
        pagination.limit,
        pagination.row_offset()
    )
}

/// Read path in front of a [`LogStore`].
pub struct LogQueryService {
    store: Arc<dyn LogStore>,
    cache: Arc<dyn CacheStore>,
    faults: FaultReporter,
    ttl: Duration,
}

impl LogQueryService {
    pub fn new(store: Arc<dyn LogStore>, cache: Arc<dyn CacheStore>, faults: FaultReporter) -> Self {
        Self {
            store,
            cache,
            faults,
            ttl: CACHE_TTL,
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Serve a page from the cache, or query the store and cache the result.
    pub async fn get_logs(
        &self,
        filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>> {
        let key = cache_key(filter, pagination);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(page) => {
                    debug!(key = %key, "Cache hit");
                    return Ok(page);
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => {
                self.faults.report(SERVICE_SOURCE, &e.to_string());
                return Err(e);
            }
        }

        let page = match self.store.query_logs(filter, pagination).await {
            Ok(page) => page,
            Err(e) => {
                self.faults.report(REPOSITORY_SOURCE, &e.to_string());
                return Err(e);
            }
        };

        // a failed cache write leaves the freshly read page correct, so it is
        // reported and the page is still returned
        match serde_json::to_string(&page) {
            Ok(encoded) => {
                if let Err(e) = self.cache.set(&key, encoded, self.ttl).await {
                    self.faults.report(SERVICE_SOURCE, &e.to_string());
                }
            }
            Err(e) => {
                let err = LoggerError::serialization("encode cached page", e);
                self.faults.report(SERVICE_SOURCE, &err.to_string());
            }
        }

        Ok(page)
    }
}
