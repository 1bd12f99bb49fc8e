use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{LoggerError, LoggerResult};
use crate::transport::PoisonPolicy;

/// Broker or cache address that selects the in-process implementation.
pub const IN_PROCESS: &str = "in-process";

/// Read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "logger.toml";

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 10,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Relational store connection. `mysql://` or `sqlite:` URLs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub conn_max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://logger.db?mode=rwc".to_string(),
            max_connections: 10,
            conn_max_lifetime_secs: 180,
        }
    }
}

/// Broker connection and consumer group.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers, or `in-process`.
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub ssl_ca_location: Option<String>,
    pub ssl_certificate_location: Option<String>,
    pub ssl_key_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "log_events".to_string(),
            group_id: "logger-consumers".to_string(),
            ssl_ca_location: None,
            ssl_certificate_location: None,
            ssl_key_location: None,
        }
    }
}

impl KafkaConfig {
    pub fn is_in_process(&self) -> bool {
        self.brokers.trim() == IN_PROCESS
    }

    /// True when a CA file or an `ssl` protocol is configured.
    pub fn uses_tls(&self) -> bool {
        self.ssl_ca_location.is_some()
    }
}

/// Shared cache and rate-limit store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedisConfig {
    /// `redis://` URL, or `in-process`.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn is_in_process(&self) -> bool {
        self.url.trim() == IN_PROCESS
    }
}

/// GCRA parameters for the read endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub rate: u32,
    pub burst: u32,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 1000,
            burst: 100,
            period_secs: 60,
        }
    }
}

/// Subscriber behaviour on failed messages.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestionConfig {
    pub poison_policy: PoisonPolicy,
    pub redelivery_backoff_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poison_policy: PoisonPolicy::default(),
            redelivery_backoff_ms: 1000,
        }
    }
}

/// Load configuration: built-in defaults, then the TOML file, then
/// `LOGGER_` environment variables (`__` separates nested keys, e.g.
/// `LOGGER_DATABASE__URL`).
pub fn load_config(path: Option<&Path>) -> LoggerResult<LoggerConfig> {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let figment = Figment::from(Serialized::defaults(LoggerConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("LOGGER_").split("__"));

    let config: LoggerConfig = figment.extract()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &LoggerConfig) -> LoggerResult<()> {
    if config.database.url.trim().is_empty() {
        return Err(LoggerError::config("database.url must be set"));
    }
    if config.database.max_connections == 0 {
        return Err(LoggerError::config("database.max_connections must be positive"));
    }
    if config.kafka.brokers.trim().is_empty() {
        return Err(LoggerError::config("kafka.brokers must be set"));
    }
    if config.kafka.topic.trim().is_empty() || config.kafka.group_id.trim().is_empty() {
        return Err(LoggerError::config("kafka.topic and kafka.group_id must be set"));
    }
    let limit = &config.rate_limit;
    if limit.rate == 0 || limit.burst == 0 || limit.period_secs == 0 {
        return Err(LoggerError::config(
            "rate_limit.rate, rate_limit.burst and rate_limit.period_secs must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = load_config(None).map_err(|e| e.to_string())?;
            assert_eq!(config, LoggerConfig::default());
            assert_eq!(config.kafka.topic, "log_events");
            assert_eq!(config.kafka.group_id, "logger-consumers");
            assert_eq!(config.rate_limit.rate, 1000);
            assert_eq!(config.ingestion.poison_policy, PoisonPolicy::Redeliver);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [database]
                url = "mysql://logger:secret@db/logs"

                [kafka]
                brokers = "in-process"

                [ingestion]
                poison_policy = "commit"
                "#,
            )?;
            jail.set_env("LOGGER_DATABASE__MAX_CONNECTIONS", "4");
            jail.set_env("LOGGER_RATE_LIMIT__BURST", "5");

            let config = load_config(None).map_err(|e| e.to_string())?;
            assert_eq!(config.database.url, "mysql://logger:secret@db/logs");
            assert_eq!(config.database.max_connections, 4);
            assert_eq!(config.database.conn_max_lifetime_secs, 180);
            assert!(config.kafka.is_in_process());
            assert_eq!(config.rate_limit.burst, 5);
            assert_eq!(config.ingestion.poison_policy, PoisonPolicy::Commit);
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LOGGER_RATE_LIMIT__RATE", "0");
            let err = load_config(None).unwrap_err();
            assert!(matches!(err, LoggerError::Config { .. }));
            Ok(())
        });
    }
}
