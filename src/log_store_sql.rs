use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::config_loader::DatabaseConfig;
use crate::errors::{LoggerError, LoggerResult};
use crate::log_record::{LogFilter, LogRecord, NewLogRecord, PaginatedResult, Pagination};
use crate::log_store::LogStore;
use crate::query_builder::{BindValue, LogQuery, LOG_COLUMNS};

const MYSQL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    logLevel VARCHAR(5) NOT NULL,
    source VARCHAR(255) NOT NULL,
    message TEXT NOT NULL,
    createdAt DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updatedAt DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    INDEX idx_logs_level_created (logLevel, createdAt)
)
"#;

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    logLevel TEXT NOT NULL,
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    createdAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updatedAt TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

const INSERT_LOG: &str = "INSERT INTO logs (logLevel, source, message) VALUES (?, ?, ?)";

/// Row shape shared by both backends. Timestamps are stored without zone and
/// are UTC by convention.
#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: i64,
    #[sqlx(rename = "logLevel")]
    log_level: String,
    source: String,
    message: String,
    #[sqlx(rename = "createdAt")]
    created_at: NaiveDateTime,
    #[sqlx(rename = "updatedAt")]
    updated_at: NaiveDateTime,
}

#[derive(Debug, Error)]
enum RowError {
    #[error("unexpected log level '{level}' in row {id}")]
    UnknownLevel { id: i64, level: String },
    #[error("read-back of log {id} does not match the inserted values")]
    ReadBackMismatch { id: i64 },
}

impl TryFrom<LogRow> for LogRecord {
    type Error = LoggerError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let level = row.log_level.parse().map_err(|_| {
            LoggerError::database(
                "decode log row",
                RowError::UnknownLevel {
                    id: row.id,
                    level: row.log_level.clone(),
                },
            )
        })?;

        Ok(LogRecord {
            id: row.id,
            level,
            source: row.source,
            message: row.message,
            created_at: row.created_at.and_utc(),
            updated_at: row.updated_at.and_utc(),
        })
    }
}

macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                BindValue::Text(text) => query.bind(text),
                BindValue::Int(int) => query.bind(int),
            };
        }
        query
    }};
}

macro_rules! fetch_page {
    ($db:ty, $pool:expr, $query:expr) => {{
        let select_sql = $query.select_sql();
        let rows: Vec<LogRow> =
            bind_values!(sqlx::query_as::<$db, LogRow>(&select_sql), $query.page_values())
                .fetch_all($pool)
                .await
                .map_err(|e| LoggerError::database("query logs page", e))?;

        let count_sql = $query.count_sql();
        let total: i64 =
            bind_values!(sqlx::query_scalar::<$db, i64>(&count_sql), $query.values().to_vec())
                .fetch_one($pool)
                .await
                .map_err(|e| LoggerError::database("count logs", e))?;

        (rows, total)
    }};
}

macro_rules! insert_and_read_back {
    ($db:ty, $pool:expr, $record:expr, $last_id:ident) => {{
        let result = sqlx::query::<$db>(INSERT_LOG)
            .bind($record.level.as_str())
            .bind($record.source.as_str())
            .bind($record.message.as_str())
            .execute($pool)
            .await
            .map_err(|e| LoggerError::database("insert log", e))?;

        let id = i64::try_from(result.$last_id())
            .map_err(|_| LoggerError::internal("last insert id out of range"))?;

        let select_sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE id = ?");
        sqlx::query_as::<$db, LogRow>(&select_sql)
            .bind(id)
            .fetch_one($pool)
            .await
            .map_err(|e| LoggerError::database("read back inserted log", e))?
    }};
}

/// sqlx-backed log store. MySQL in production, SQLite for local runs and tests.
#[derive(Debug, Clone)]
pub enum SqlLogStore {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl SqlLogStore {
    /// Open a pool for the backend named by the URL scheme.
    pub async fn connect(config: &DatabaseConfig) -> LoggerResult<Self> {
        let url = config.url.trim();

        if url.starts_with("mysql://") {
            let pool = MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .max_lifetime(Duration::from_secs(config.conn_max_lifetime_secs))
                .connect(url)
                .await
                .map_err(|e| LoggerError::database("connect mysql", e))?;
            info!("Connected to MySQL log store");
            Ok(Self::MySql(pool))
        } else if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)
                .map_err(|e| LoggerError::database("parse sqlite url", e))?
                .create_if_missing(true);
            // every connection to an in-memory database is a separate database
            let max_connections = if url.contains(":memory:") {
                1
            } else {
                config.max_connections
            };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .max_lifetime(Duration::from_secs(config.conn_max_lifetime_secs))
                .connect_with(options)
                .await
                .map_err(|e| LoggerError::database("connect sqlite", e))?;
            info!("Connected to SQLite log store");
            Ok(Self::Sqlite(pool))
        } else {
            Err(LoggerError::config(format!(
                "unsupported database url '{url}': expected mysql:// or sqlite:"
            )))
        }
    }

    /// Fresh in-memory SQLite store with the schema applied.
    pub async fn in_memory() -> LoggerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| LoggerError::database("connect sqlite", e))?;
        let store = Self::Sqlite(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the `logs` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> LoggerResult<()> {
        match self {
            Self::MySql(pool) => sqlx::query(MYSQL_SCHEMA).execute(pool).await.map(|_| ()),
            Self::Sqlite(pool) => sqlx::query(SQLITE_SCHEMA).execute(pool).await.map(|_| ()),
        }
        .map_err(|e| LoggerError::database("create logs table", e))?;
        Ok(())
    }

    /// Wait for pooled connections to close.
    pub async fn close(&self) {
        match self {
            Self::MySql(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl LogStore for SqlLogStore {
    async fn create_log(&self, record: &NewLogRecord) -> LoggerResult<()> {
        let row = match self {
            Self::MySql(pool) => insert_and_read_back!(sqlx::MySql, pool, record, last_insert_id),
            Self::Sqlite(pool) => {
                insert_and_read_back!(sqlx::Sqlite, pool, record, last_insert_rowid)
            }
        };

        let id = row.id;
        let stored = LogRecord::try_from(row)?;
        if stored.level != record.level
            || stored.source != record.source
            || stored.message != record.message
        {
            return Err(LoggerError::database(
                "verify inserted log",
                RowError::ReadBackMismatch { id },
            ));
        }

        debug!(id, level = %stored.level, source = %stored.source, "Log persisted");
        Ok(())
    }

    async fn query_logs(
        &self,
        filter: &LogFilter,
        pagination: &Pagination,
    ) -> LoggerResult<PaginatedResult<LogRecord>> {
        let query = LogQuery::new(filter, pagination);

        let (rows, total) = match self {
            Self::MySql(pool) => fetch_page!(sqlx::MySql, pool, query),
            Self::Sqlite(pool) => fetch_page!(sqlx::Sqlite, pool, query),
        };

        let data = rows
            .into_iter()
            .map(LogRecord::try_from)
            .collect::<LoggerResult<Vec<_>>>()?;

        Ok(PaginatedResult { data, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_record::{DateRange, LogLevel};

    fn new_log(level: LogLevel, source: &str, message: &str) -> NewLogRecord {
        NewLogRecord {
            level,
            source: source.to_string(),
            message: message.to_string(),
        }
    }

    async fn seeded_store() -> SqlLogStore {
        let store = SqlLogStore::in_memory().await.unwrap();
        let seed = [
            (LogLevel::Info, "api", "started"),
            (LogLevel::Warn, "api", "slow request"),
            (LogLevel::Error, "db", "deadlock"),
            (LogLevel::Info, "worker", "job done"),
            (LogLevel::Fatal, "worker", "out of memory"),
        ];
        for (level, source, message) in seed {
            store.create_log(&new_log(level, source, message)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn create_log_assigns_increasing_ids() {
        let store = seeded_store().await;
        let page = store
            .query_logs(&LogFilter::default(), &Pagination::new(100, 0))
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        let ids: Vec<i64> = page.data.iter().map(|r| r.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(page.data[2].level, LogLevel::Error);
        assert_eq!(page.data[2].message, "deadlock");
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let store = seeded_store().await;
        store.ensure_schema().await.unwrap();

        let page = store
            .query_logs(&LogFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn level_filter_matches_any_case() {
        let store = seeded_store().await;
        let filter = LogFilter {
            level_filter: vec!["info".into(), "ERROR".into()],
            date_filter: None,
        };
        let page = store.query_logs(&filter, &Pagination::default()).await.unwrap();

        assert_eq!(page.total, 3);
        assert!(page
            .data
            .iter()
            .all(|r| matches!(r.level, LogLevel::Info | LogLevel::Error)));
    }

    #[tokio::test]
    async fn total_ignores_pagination() {
        let store = seeded_store().await;
        let page = store
            .query_logs(&LogFilter::default(), &Pagination::new(2, 1))
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].message, "deadlock");

        let last = store
            .query_logs(&LogFilter::default(), &Pagination::new(2, 2))
            .await
            .unwrap();
        assert_eq!(last.data.len(), 1);
    }

    #[tokio::test]
    async fn date_filter_bounds_are_inclusive_ranges() {
        let store = seeded_store().await;
        let everything = LogFilter {
            level_filter: vec!["fatal".into()],
            date_filter: Some(DateRange {
                from: "2000-01-01 00:00:00".into(),
                to: "2999-12-31 23:59:59".into(),
            }),
        };
        let page = store.query_logs(&everything, &Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);

        let nothing = LogFilter {
            level_filter: vec![],
            date_filter: Some(DateRange {
                from: "2000-01-01 00:00:00".into(),
                to: "2000-12-31 23:59:59".into(),
            }),
        };
        let page = store.query_logs(&nothing, &Pagination::default()).await.unwrap();
        assert_eq!(page, PaginatedResult::empty());
    }

    #[tokio::test]
    async fn empty_table_returns_empty_page() {
        let store = SqlLogStore::in_memory().await.unwrap();
        let page = store
            .query_logs(&LogFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn unknown_url_scheme_is_a_config_error() {
        let config = DatabaseConfig {
            url: "postgres://localhost/logs".into(),
            ..DatabaseConfig::default()
        };
        let err = SqlLogStore::connect(&config).await.unwrap_err();
        assert!(matches!(err, LoggerError::Config { .. }));
    }
}
