//! Message transport seams and the consumer-group subscribe loop.
//!
//! Each delivery moves through an explicit claim state machine:
//!
//! ```text
//! Delivered -> Processing -> Committed
//!                         -> Failed { redeliver: true }   (offset withheld, rewound)
//!                         -> Skipped                      (poison, committed under `commit` policy)
//! ```
//!
//! The loop never commits an offset whose handler returned an error, except
//! for poison messages when the operator opted into [`PoisonPolicy::Commit`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::LoggerResult;

/// Fire-and-forget publisher. Failures are logged by the implementation and
/// never reach the caller.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>);
}

/// One message as received from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// One consumer-group member bound to a topic.
#[async_trait]
pub trait ConsumerTransport: Send {
    /// Wait for the next message.
    async fn recv(&mut self) -> LoggerResult<Delivery>;

    /// Mark `delivery` as processed for the group.
    async fn commit(&mut self, delivery: &Delivery) -> LoggerResult<()>;

    /// Rewind so that `delivery` is handed out again.
    async fn redeliver(&mut self, delivery: &Delivery) -> LoggerResult<()>;
}

/// Processes one payload. An error withholds the commit.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Error: Display + Send;

    async fn handle(&self, payload: &[u8]) -> Result<(), Self::Error>;

    /// Errors that redelivery can never fix.
    fn is_poison(&self, _err: &Self::Error) -> bool {
        false
    }
}

/// Lifecycle of one delivery inside the subscribe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Delivered,
    Processing,
    Committed,
    Failed { redeliver: bool },
    Skipped,
}

impl ClaimState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimState::Committed | ClaimState::Failed { .. } | ClaimState::Skipped
        )
    }

    /// True when the group offset moves past the message.
    pub fn commits_offset(&self) -> bool {
        matches!(self, ClaimState::Committed | ClaimState::Skipped)
    }
}

/// What to do with a message the handler can never process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoisonPolicy {
    /// Withhold the commit and redeliver, like any other failure.
    #[default]
    Redeliver,
    /// Log the message and commit past it.
    Commit,
}

/// Tuning for [`run_subscriber`].
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub poison_policy: PoisonPolicy,
    /// Pause before a failed message is handed out again.
    pub redelivery_backoff: Duration,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            poison_policy: PoisonPolicy::Redeliver,
            redelivery_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters returned when the subscribe loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub committed: u64,
    pub redelivered: u64,
    pub skipped: u64,
}

/// Outcome of running the handler on one delivery.
pub fn settle<H: MessageHandler>(
    handler: &H,
    result: &Result<(), H::Error>,
    policy: PoisonPolicy,
) -> ClaimState {
    match result {
        Ok(()) => ClaimState::Committed,
        Err(err) if handler.is_poison(err) && policy == PoisonPolicy::Commit => ClaimState::Skipped,
        Err(_) => ClaimState::Failed { redeliver: true },
    }
}

/// Drive `consumer` until `cancel` fires. A delivery that has started
/// processing always runs to completion; cancellation is only observed
/// between deliveries.
pub async fn run_subscriber<H: MessageHandler>(
    mut consumer: Box<dyn ConsumerTransport>,
    handler: Arc<H>,
    options: SubscriberOptions,
    cancel: CancellationToken,
) -> SubscriberStats {
    let mut stats = SubscriberStats::default();
    info!(policy = ?options.poison_policy, "Subscriber started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = consumer.recv() => match received {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, "Failed to receive message");
                    if !backoff(&cancel, options.redelivery_backoff).await {
                        break;
                    }
                    continue;
                }
            },
        };

        debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            state = ?ClaimState::Delivered,
            "Message delivered"
        );

        debug!(offset = delivery.offset, state = ?ClaimState::Processing, "Processing message");
        let result = handler.handle(&delivery.payload).await;
        let state = settle(handler.as_ref(), &result, options.poison_policy);

        if let Err(e) = &result {
            match state {
                ClaimState::Skipped => warn!(
                    offset = delivery.offset,
                    error = %e,
                    "Committing past poison message"
                ),
                _ => error!(
                    offset = delivery.offset,
                    error = %e,
                    "Message processing failed, offset withheld"
                ),
            }
        }

        if state.commits_offset() {
            match consumer.commit(&delivery).await {
                Ok(()) if state == ClaimState::Skipped => stats.skipped += 1,
                Ok(()) => stats.committed += 1,
                // The message will come back after a rebalance or restart.
                Err(e) => error!(offset = delivery.offset, error = %e, "Offset commit failed"),
            }
            continue;
        }

        if !rewind(&mut *consumer, &delivery, &cancel, options.redelivery_backoff).await {
            break;
        }
        stats.redelivered += 1;

        if !backoff(&cancel, options.redelivery_backoff).await {
            break;
        }
    }

    info!(
        committed = stats.committed,
        redelivered = stats.redelivered,
        skipped = stats.skipped,
        "Subscriber stopped"
    );
    stats
}

/// Retry the rewind until it succeeds. The consumer's position has already
/// moved past `delivery`, so reading on without a rewind would let the next
/// commit skip it. Returns false on cancellation; the group then resumes from
/// the last committed offset.
async fn rewind(
    consumer: &mut dyn ConsumerTransport,
    delivery: &Delivery,
    cancel: &CancellationToken,
    delay: Duration,
) -> bool {
    loop {
        match consumer.redeliver(delivery).await {
            Ok(()) => return true,
            Err(e) => {
                error!(offset = delivery.offset, error = %e, "Failed to rewind consumer, retrying");
                if !backoff(cancel, delay).await {
                    return false;
                }
            }
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn backoff(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        // still give other tasks a turn between redeliveries
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
