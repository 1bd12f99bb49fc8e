use std::sync::Arc;
use std::time::Duration;

use crate::log_query_service::LogQueryService;
use crate::rate_limiter::RateLimiter;
use crate::transport::MessagePublisher;

/// Shared handles for the HTTP layer. Built once at startup and passed to
/// every handler; nothing here is global.
pub struct AppState {
    pub query_service: LogQueryService,
    pub rate_limiter: RateLimiter,
    pub publisher: Arc<dyn MessagePublisher>,
    pub topic: String,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    /// State with a 10 s request timeout and a 10 MiB body limit.
    pub fn new(
        query_service: LogQueryService,
        rate_limiter: RateLimiter,
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            query_service,
            rate_limiter,
            publisher,
            topic: topic.into(),
            request_timeout: Duration::from_secs(10),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }

    /// Deadline for each query and rate-limit check.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Largest accepted request body.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}
