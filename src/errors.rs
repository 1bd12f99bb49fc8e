//! Error handling for the logger service
//!
//! Every fallible operation outside the HTTP edge returns [`LoggerResult`].
//! The HTTP edge converts into [`crate::api_errors::AppError`], which decides
//! what a caller is allowed to see.

use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// External collaborator an operation was talking to when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Database,
    Cache,
    Broker,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Database => "database",
            Backend::Cache => "cache",
            Backend::Broker => "broker",
        })
    }
}

/// Main error type for the logger service
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{backend} failure during {operation}: {source}")]
    Backend {
        backend: Backend,
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("could not encode or decode {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{operation} failed")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} did not finish in time")]
    Timeout { operation: String },

    #[error("{0}")]
    Internal(String),
}

pub type LoggerResult<T> = Result<T, LoggerError>;

impl LoggerError {
    fn backend(
        backend: Backend,
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            backend,
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn database(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::backend(Backend::Database, operation, source)
    }

    pub fn cache(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::backend(Backend::Cache, operation, source)
    }

    pub fn transport(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::backend(Backend::Broker, operation, source)
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for errors caused by the input itself rather than by a collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(self, LoggerError::Validation { .. })
    }

    /// The collaborator behind a backend failure, if any.
    pub fn failed_backend(&self) -> Option<Backend> {
        match self {
            LoggerError::Backend { backend, .. } => Some(*backend),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LoggerError {
    fn from(err: sqlx::Error) -> Self {
        LoggerError::database("sql statement", err)
    }
}

impl From<redis::RedisError> for LoggerError {
    fn from(err: redis::RedisError) -> Self {
        LoggerError::cache("redis command", err)
    }
}

impl From<rdkafka::error::KafkaError> for LoggerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        LoggerError::transport("kafka client", err)
    }
}

impl From<serde_json::Error> for LoggerError {
    fn from(err: serde_json::Error) -> Self {
        LoggerError::serialization("json payload", err)
    }
}

impl From<std::io::Error> for LoggerError {
    fn from(err: std::io::Error) -> Self {
        LoggerError::io("i/o", err)
    }
}

impl From<figment::Error> for LoggerError {
    fn from(err: figment::Error) -> Self {
        LoggerError::config(err.to_string())
    }
}
