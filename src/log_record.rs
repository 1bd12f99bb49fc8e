//! Log events as they travel through the service: the inbound create request,
//! the persisted record, and the read-side query descriptors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LoggerError;

/// LogLevel classifies the severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Every level, least to most severe.
    pub const ALL: [LogLevel; 4] = [LogLevel::Info, LogLevel::Warn, LogLevel::Error, LogLevel::Fatal];

    /// Upper-case wire and storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggerError;

    /// Level names are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            _ => Err(LoggerError::validation("level", "invalid log level")),
        }
    }
}

/// Unvalidated create request as carried on the ingestion topic.
///
/// Missing fields decode as empty strings so that they fail validation rather
/// than decoding; unknown fields are ignored on this path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCreateRequest {
    #[serde(default, alias = "logLevel", alias = "LogLevel")]
    pub level: String,
    #[serde(default, alias = "Source")]
    pub source: String,
    #[serde(default, alias = "Message")]
    pub message: String,
}

impl LogCreateRequest {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.as_str().to_string(),
            source: source.into(),
            message: message.into(),
        }
    }
}

/// A create request that passed validation and is ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogRecord {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// A persisted log event. `id` and both timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    #[serde(rename = "logLevel")]
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inclusive `createdAt` bounds, in the store's timestamp format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

/// Read-side filter. Level tokens are OR-combined and kept in caller order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub level_filter: Vec<String>,
    pub date_filter: Option<DateRange>,
}

impl LogFilter {
    pub fn is_empty(&self) -> bool {
        self.level_filter.is_empty() && self.date_filter.is_none()
    }
}

/// Rows per page when `limit` is absent or malformed.
pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_PAGE: u32 = 0;

/// Page request. `page` is a zero-based page index, not a row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub page: u32,
}

impl Pagination {
    pub fn new(limit: u32, page: u32) -> Self {
        Self { limit, page }
    }

    /// Row offset handed to the store.
    pub fn row_offset(&self) -> u64 {
        u64::from(self.limit) * u64::from(self.page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            page: DEFAULT_PAGE,
        }
    }
}

/// One page of results plus the filtered total, ignoring pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: i64,
}

impl<T> PaginatedResult<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
        }
    }
}

impl<T> Default for PaginatedResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}
