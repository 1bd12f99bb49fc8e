//! Single-process broker with Kafka-like semantics: an append-only log per
//! topic (one partition) and committed offsets per consumer group.
//!
//! Used for local runs (`kafka.brokers = "in-process"`) and by the ingestion
//! tests. Offsets survive consumer restarts for as long as the broker lives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::errors::{LoggerError, LoggerResult};
use crate::transport::{ConsumerTransport, Delivery, MessagePublisher};

const PARTITION: i32 = 0;

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<u8>>>,
    committed: HashMap<(String, String), i64>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    wakeups: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct InProcessBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBroker {
    pub fn new() -> Self {
        let (wakeups, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                wakeups,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join `group` on `topic`, resuming from the group's committed offset.
    pub fn subscribe(&self, topic: &str, group: &str) -> InProcessConsumer {
        let position = self.committed_offset(topic, group);
        InProcessConsumer {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
            wakeups: self.inner.wakeups.subscribe(),
        }
    }

    /// Next offset the group will read; 0 when nothing was committed yet.
    pub fn committed_offset(&self, topic: &str, group: &str) -> i64 {
        self.state()
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Every payload ever published to `topic`, in offset order.
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state().topics.get(topic).cloned().unwrap_or_default()
    }

    fn message_at(&self, topic: &str, offset: i64) -> Option<Vec<u8>> {
        let index = usize::try_from(offset).ok()?;
        self.state().topics.get(topic)?.get(index).cloned()
    }

    fn commit(&self, topic: &str, group: &str, next_offset: i64) {
        self.state()
            .committed
            .insert((topic.to_string(), group.to_string()), next_offset);
    }
}

impl MessagePublisher for InProcessBroker {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let offset = {
            let mut state = self.state();
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(payload);
            log.len() - 1
        };
        self.inner.wakeups.send_modify(|seq| *seq += 1);
        debug!(topic, offset, "Published in-process message");
    }
}

/// Group member reading one topic of an [`InProcessBroker`].
pub struct InProcessConsumer {
    broker: InProcessBroker,
    topic: String,
    group: String,
    position: i64,
    wakeups: watch::Receiver<u64>,
}

impl InProcessConsumer {
    /// Next offset `recv` will hand out.
    pub fn position(&self) -> i64 {
        self.position
    }
}

#[async_trait]
impl ConsumerTransport for InProcessConsumer {
    async fn recv(&mut self) -> LoggerResult<Delivery> {
        loop {
            // mark the current sequence as seen before looking, so a publish
            // racing with the lookup still wakes us
            self.wakeups.borrow_and_update();

            if let Some(payload) = self.broker.message_at(&self.topic, self.position) {
                let delivery = Delivery {
                    topic: self.topic.clone(),
                    partition: PARTITION,
                    offset: self.position,
                    payload,
                };
                self.position += 1;
                return Ok(delivery);
            }

            self.wakeups
                .changed()
                .await
                .map_err(|_| LoggerError::internal("in-process broker closed"))?;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> LoggerResult<()> {
        self.broker.commit(&self.topic, &self.group, delivery.offset + 1);
        Ok(())
    }

    async fn redeliver(&mut self, delivery: &Delivery) -> LoggerResult<()> {
        self.position = delivery.offset;
        Ok(())
    }
}
