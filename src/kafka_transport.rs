use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::config_loader::KafkaConfig;
use crate::errors::{LoggerError, LoggerResult};
use crate::transport::{ConsumerTransport, Delivery, MessagePublisher};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared client settings: bootstrap servers plus optional mutual TLS.
fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.brokers);

    if config.uses_tls() {
        client.set("security.protocol", "ssl");
        if let Some(ca) = &config.ssl_ca_location {
            client.set("ssl.ca.location", ca);
        }
        if let Some(cert) = &config.ssl_certificate_location {
            client.set("ssl.certificate.location", cert);
        }
        if let Some(key) = &config.ssl_key_location {
            client.set("ssl.key.location", key);
        }
    }

    client
}

/// Fire-and-forget producer shared by the HTTP layer and fault reports.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> LoggerResult<Self> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| LoggerError::transport("create kafka producer", e))?;
        info!(brokers = %config.brokers, "Kafka producer ready");
        Ok(Self { producer })
    }

    /// Wait for queued messages to be delivered.
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            warn!(error = %e, "Kafka producer flush incomplete");
        }
    }
}

impl MessagePublisher for KafkaPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_slice());
        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                error!(topic, error = %e, "Failed to enqueue message");
                return;
            }
        };

        let topic = topic.to_string();
        let report = async move {
            match delivery.await {
                Ok(Ok(_)) => debug!(topic = %topic, "Message delivered"),
                Ok(Err((e, _))) => error!(topic = %topic, error = %e, "Message delivery failed"),
                Err(_) => error!(topic = %topic, "Message delivery cancelled"),
            }
        };

        // outside a runtime the delivery report is dropped; librdkafka still delivers
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(report);
            }
            Err(_) => debug!("No runtime to await delivery report"),
        }
    }
}

/// Consumer-group member with manual offset commits.
pub struct KafkaConsumerTransport {
    consumer: StreamConsumer,
}

impl KafkaConsumerTransport {
    /// Join `config.group_id` on `config.topic` with manual offset commits.
    pub fn subscribe(config: &KafkaConfig) -> LoggerResult<Self> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| LoggerError::transport("create kafka consumer", e))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| LoggerError::transport("subscribe", e))?;

        info!(topic = %config.topic, group = %config.group_id, "Kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl ConsumerTransport for KafkaConsumerTransport {
    async fn recv(&mut self) -> LoggerResult<Delivery> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| LoggerError::transport("receive", e))?;

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&mut self, delivery: &Delivery) -> LoggerResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| LoggerError::transport("build commit list", e))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| LoggerError::transport("commit offset", e))
    }

    async fn redeliver(&mut self, delivery: &Delivery) -> LoggerResult<()> {
        self.consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Timeout::After(SEEK_TIMEOUT),
            )
            .map_err(|e| LoggerError::transport("seek for redelivery", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_settings_only_when_ca_is_configured() {
        let plain = client_config(&KafkaConfig::default());
        assert_eq!(plain.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(plain.get("security.protocol"), None);

        let tls = client_config(&KafkaConfig {
            ssl_ca_location: Some("/etc/kafka/ca.pem".into()),
            ssl_certificate_location: Some("/etc/kafka/client.pem".into()),
            ssl_key_location: Some("/etc/kafka/client.key".into()),
            ..KafkaConfig::default()
        });
        assert_eq!(tls.get("security.protocol"), Some("ssl"));
        assert_eq!(tls.get("ssl.ca.location"), Some("/etc/kafka/ca.pem"));
        assert_eq!(tls.get("ssl.key.location"), Some("/etc/kafka/client.key"));
    }
}
