//! Process wiring: builds every collaborator from configuration, runs the
//! HTTP server next to the ingestion subscriber, and tears both down in
//! order on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app_state::AppState;
use crate::cache_store::{CacheStore, MemoryCache, RedisCache};
use crate::config_loader::{DatabaseConfig, KafkaConfig, LoggerConfig, RedisConfig};
use crate::errors::{LoggerError, LoggerResult};
use crate::fault_report::FaultReporter;
use crate::in_process_broker::InProcessBroker;
use crate::ingest::IngestionProcessor;
use crate::input_validator::validate_create_request;
use crate::kafka_transport::{KafkaConsumerTransport, KafkaPublisher};
use crate::log_query_service::LogQueryService;
use crate::log_record::LogCreateRequest;
use crate::log_store_sql::SqlLogStore;
use crate::rate_limiter::{Limit, MemoryRateLimitStore, RateLimitStore, RateLimiter, RedisRateLimitStore};
use crate::transport::{run_subscriber, ConsumerTransport, MessagePublisher, SubscriberOptions};
use crate::web::build_router;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often process-local stores drop expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Broker connection chosen by `kafka.brokers`.
pub enum Broker {
    Kafka(KafkaPublisher),
    InProcess(InProcessBroker),
}

impl Broker {
    pub fn connect(config: &KafkaConfig) -> LoggerResult<Self> {
        if config.is_in_process() {
            info!("Using in-process broker");
            return Ok(Self::InProcess(InProcessBroker::new()));
        }
        Ok(Self::Kafka(KafkaPublisher::new(config)?))
    }

    /// Publisher handle for the HTTP layer and fault reports.
    pub fn publisher(&self) -> Arc<dyn MessagePublisher> {
        match self {
            Self::Kafka(producer) => Arc::new(producer.clone()),
            Self::InProcess(broker) => Arc::new(broker.clone()),
        }
    }

    /// Consumer-group member for the configured topic.
    pub fn consumer(&self, config: &KafkaConfig) -> LoggerResult<Box<dyn ConsumerTransport>> {
        match self {
            Self::Kafka(_) => Ok(Box::new(KafkaConsumerTransport::subscribe(config)?)),
            Self::InProcess(broker) => Ok(Box::new(
                broker.subscribe(&config.topic, &config.group_id),
            )),
        }
    }

    /// Wait for queued Kafka messages, up to `timeout`.
    pub fn flush(&self, timeout: Duration) {
        if let Self::Kafka(producer) = self {
            producer.flush(timeout);
        }
    }
}

pub async fn connect_store(config: &DatabaseConfig) -> LoggerResult<Arc<SqlLogStore>> {
    Ok(Arc::new(SqlLogStore::connect(config).await?))
}

/// Cache and rate-limit stores, sharing one Redis connection manager.
pub async fn shared_stores(
    config: &RedisConfig,
) -> LoggerResult<(Arc<dyn CacheStore>, Arc<dyn RateLimitStore>)> {
    if config.is_in_process() {
        info!("Using in-process cache and rate-limit store");
        return Ok((
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryRateLimitStore::new()),
        ));
    }

    let client = redis::Client::open(config.url.as_str())
        .map_err(|e| LoggerError::cache("open redis client", e))?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| LoggerError::cache("connect redis", e))?;
    info!("Connected to Redis");

    Ok((
        Arc::new(RedisCache::from_manager(conn.clone())),
        Arc::new(RedisRateLimitStore::new(conn)),
    ))
}

/// Run the HTTP API and the ingestion subscriber until SIGINT or SIGTERM.
pub async fn serve(config: LoggerConfig) -> LoggerResult<()> {
    let store = connect_store(&config.database).await?;
    if matches!(*store, SqlLogStore::Sqlite(_)) {
        store.ensure_schema().await?;
    }

    let broker = Broker::connect(&config.kafka)?;
    let publisher = broker.publisher();
    let (cache, limits) = shared_stores(&config.redis).await?;

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_expired(
        cache.clone(),
        limits.clone(),
        SWEEP_INTERVAL,
        cancel.clone(),
    ));

    let faults = FaultReporter::new(publisher.clone(), config.kafka.topic.clone());
    let query_service = LogQueryService::new(store.clone(), cache, faults);
    let rate_limiter = RateLimiter::new(limits, Limit::from(&config.rate_limit));
    let state = Arc::new(
        AppState::new(query_service, rate_limiter, publisher, config.kafka.topic.clone())
            .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs))
            .with_max_body_bytes(config.server.max_body_bytes),
    );

    let options = SubscriberOptions {
        poison_policy: config.ingestion.poison_policy,
        redelivery_backoff: Duration::from_millis(config.ingestion.redelivery_backoff_ms),
    };
    let subscriber = tokio::spawn(run_subscriber(
        broker.consumer(&config.kafka)?,
        Arc::new(IngestionProcessor::new(store.clone())),
        options,
        cancel.clone(),
    ));

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .map_err(|e| LoggerError::io("bind listener", e))?;
    info!(addr = %config.server.bind_addr, "Logger service listening");

    tokio::spawn(shutdown_signal(cancel.clone()));
    let shutdown = cancel.clone();
    let served = axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;

    // stop ingestion after the last request drained; the in-flight message completes
    cancel.cancel();
    match subscriber.await {
        Ok(stats) => info!(
            committed = stats.committed,
            redelivered = stats.redelivered,
            skipped = stats.skipped,
            "Ingestion stopped"
        ),
        Err(e) => error!(error = %e, "Ingestion task failed"),
    }

    if let Err(e) = sweeper.await {
        error!(error = %e, "Expiry sweeper failed");
    }

    broker.flush(FLUSH_TIMEOUT);
    store.close().await;
    info!("Logger service stopped");

    served.map_err(|e| LoggerError::io("serve http", e))
}

/// Periodically drop expired cache entries and replenished rate-limit keys
/// until `cancel` fires. A no-op sweep for Redis-backed stores.
pub async fn sweep_expired(
    cache: Arc<dyn CacheStore>,
    limits: Arc<dyn RateLimitStore>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let entries = cache.purge_expired().await;
                let keys = limits.cleanup_expired().await;
                if entries + keys > 0 {
                    debug!(entries, keys, "Swept expired entries");
                }
            }
        }
    }
}

/// Create the `logs` table on the configured database.
pub async fn migrate(config: &LoggerConfig) -> LoggerResult<()> {
    let store = connect_store(&config.database).await?;
    store.ensure_schema().await?;
    store.close().await;
    info!("Schema is up to date");
    Ok(())
}

/// Validate and publish one event onto the ingestion topic.
pub async fn publish_one(config: &LoggerConfig, request: LogCreateRequest) -> LoggerResult<()> {
    let record = validate_create_request(&request)?;
    let event = LogCreateRequest::new(record.level, record.source, record.message);
    let payload = serde_json::to_vec(&event)?;

    let broker = Broker::connect(&config.kafka)?;
    broker.publisher().publish(&config.kafka.topic, payload);
    broker.flush(FLUSH_TIMEOUT);
    info!(topic = %config.kafka.topic, "Event published");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }

    info!("Shutdown signal received");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Delivery;

    #[tokio::test]
    async fn in_process_broker_is_selected_by_name() {
        let config = KafkaConfig {
            brokers: "in-process".into(),
            ..KafkaConfig::default()
        };
        let broker = Broker::connect(&config).unwrap();
        assert!(matches!(broker, Broker::InProcess(_)));

        let mut consumer = broker.consumer(&config).unwrap();
        broker.publisher().publish(&config.topic, b"{}".to_vec());
        let delivery: Delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.topic, "log_events");
    }

    #[tokio::test]
    async fn publish_one_rejects_invalid_events() {
        let config = LoggerConfig {
            kafka: KafkaConfig {
                brokers: "in-process".into(),
                ..KafkaConfig::default()
            },
            ..LoggerConfig::default()
        };
        let err = publish_one(&config, LogCreateRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
