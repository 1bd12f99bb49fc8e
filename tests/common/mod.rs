//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use logger_service::app_state::AppState;
use logger_service::cache_store::{CacheStore, MemoryCache};
use logger_service::fault_report::FaultReporter;
use logger_service::in_process_broker::InProcessBroker;
use logger_service::log_query_service::LogQueryService;
use logger_service::log_record::{
    LogFilter, LogLevel, LogRecord, NewLogRecord, PaginatedResult, Pagination,
};
use logger_service::log_store::LogStore;
use logger_service::rate_limiter::{Limit, MemoryRateLimitStore, RateLimiter};
use logger_service::{LoggerError, LoggerResult};

pub const TOPIC: &str = "log_events";
pub const GROUP: &str = "logger-consumers";

pub fn new_log(level: LogLevel, source: &str, message: &str) -> NewLogRecord {
    NewLogRecord {
        level,
        source: source.to_string(),
        message: message.to_string(),
    }
}

/// Wraps a store and counts calls to it.
pub struct CountingStore {
    inner: Arc<dyn LogStore>,
    queries: AtomicUsize,
    creates: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn LogStore>) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogStore for CountingStore {
    async fn create_log(&self, record: &NewLogRecord) -> LoggerResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_log(record).await
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_logs(filter, pagination).await
    }
}

/// Fails the first `failures` inserts, then delegates.
pub struct FlakyStore {
    inner: Arc<dyn LogStore>,
    failures: Mutex<usize>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LogStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn create_log(&self, record: &NewLogRecord) -> LoggerResult<()> {
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(LoggerError::internal("connection reset by peer"));
        }
        self.inner.create_log(record).await
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>> {
        self.inner.query_logs(filter, pagination).await
    }
}

/// Store without a database: keeps records in a vector and ignores filters.
/// Lets time-paused tests avoid real I/O.
#[derive(Default)]
pub struct VecStore {
    records: Mutex<Vec<LogRecord>>,
    fail_queries: Mutex<bool>,
}

impl VecStore {
    pub fn fail_queries(&self, fail: bool) {
        *self.fail_queries.lock().unwrap() = fail;
    }
}

#[async_trait]
impl LogStore for VecStore {
    async fn create_log(&self, record: &NewLogRecord) -> LoggerResult<()> {
        let mut records = self.records.lock().unwrap();
        let now = Utc::now();
        let id = records.len() as i64 + 1;
        records.push(LogRecord {
            id,
            level: record.level,
            source: record.source.clone(),
            message: record.message.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn query_logs(
        &self,
        _filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>> {
        if *self.fail_queries.lock().unwrap() {
            return Err(LoggerError::internal("database is locked"));
        }
        let records = self.records.lock().unwrap();
        let data = records
            .iter()
            .skip(pagination.row_offset() as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        Ok(PaginatedResult {
            data,
            total: records.len() as i64,
        })
    }
}

/// Cache whose writes always fail; reads always miss.
pub struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> LoggerResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> LoggerResult<()> {
        Err(LoggerError::cache(
            "cache set",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "redis down"),
        ))
    }
}

pub fn query_service(store: Arc<dyn LogStore>, broker: &InProcessBroker) -> LogQueryService {
    let faults = FaultReporter::new(Arc::new(broker.clone()), TOPIC);
    LogQueryService::new(store, Arc::new(MemoryCache::new()), faults)
}

pub fn app_state(store: Arc<dyn LogStore>, broker: &InProcessBroker, limit: Limit) -> Arc<AppState> {
    let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), limit);
    Arc::new(AppState::new(
        query_service(store, broker),
        limiter,
        Arc::new(broker.clone()),
        TOPIC,
    ))
}

pub fn generous_limit() -> Limit {
    Limit::per_minute(1000, 100)
}
