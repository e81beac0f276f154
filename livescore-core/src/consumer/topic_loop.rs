//! Pull loop for a single topic.

use super::{DeadLetterPolicy, MessageHandler};
use crate::broker::{BrokerError, ConsumedMessage, Consumer};
use crate::config::ConsumerConfig;
use crate::metrics::ThroughputCounters;
use bytes::Bytes;
use livescore_sdk::codec::{self, WireSchema};
use livescore_sdk::objects::DeadLetterRecord;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where a message ended up before its offset is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    DeadLettered,
}

/// States of a topic loop.
///
/// `Subscribed → Polling → Processing → Committing → Polling`, with
/// `Closing` terminal. A handler failure goes from `Processing` straight back
/// to `Polling` so the uncommitted message is served again.
#[derive(Debug)]
enum LoopState {
    Subscribed,
    Polling,
    Processing(ConsumedMessage),
    Committing {
        message: ConsumedMessage,
        outcome: Outcome,
    },
    Closing,
}

pub(crate) struct TopicLoop<M, H> {
    consumer: Box<dyn Consumer>,
    handler: Arc<H>,
    dead_letters: DeadLetterPolicy,
    config: ConsumerConfig,
    counters: Arc<ThroughputCounters>,
    shutdown_rx: watch::Receiver<bool>,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> TopicLoop<M, H>
where
    M: WireSchema + Send + 'static,
    H: MessageHandler<M> + 'static,
{
    pub(crate) fn new(
        consumer: Box<dyn Consumer>,
        handler: Arc<H>,
        dead_letters: DeadLetterPolicy,
        config: ConsumerConfig,
        counters: Arc<ThroughputCounters>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            handler,
            dead_letters,
            config,
            counters,
            shutdown_rx,
            _message: PhantomData,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut state = LoopState::Subscribed;
        loop {
            state = match state {
                LoopState::Subscribed => {
                    info!(
                        topic = self.consumer.topic(),
                        group_id = self.consumer.group_id(),
                        "Consumer loop subscribed"
                    );
                    LoopState::Polling
                }
                LoopState::Polling => self.poll().await,
                LoopState::Processing(message) => self.process(message).await,
                LoopState::Committing { message, outcome } => self.commit(message, outcome).await,
                LoopState::Closing => break,
            };
        }

        self.consumer.close().await;
        info!(topic = self.consumer.topic(), "Consumer loop closed");
    }

    async fn poll(&mut self) -> LoopState {
        if *self.shutdown_rx.borrow() {
            return LoopState::Closing;
        }

        let polled = tokio::select! {
            biased;

            _ = self.shutdown_rx.wait_for(|stop| *stop) => {
                info!("Consumer loop received shutdown signal");
                return LoopState::Closing;
            }

            polled = self.consumer.poll(self.config.poll_timeout) => polled,
        };

        match polled {
            Ok(Some(message)) => LoopState::Processing(message),
            Ok(None) => LoopState::Polling,
            Err(BrokerError::Closed) => {
                warn!(topic = self.consumer.topic(), "Broker connection closed");
                LoopState::Closing
            }
            Err(e) if e.is_fatal() => {
                error!(topic = self.consumer.topic(), error = %e, "Fatal consume error");
                self.dead_letter(e.to_string(), e.raw_payload()).await;
                LoopState::Closing
            }
            Err(e) => {
                warn!(
                    topic = self.consumer.topic(),
                    error = %e,
                    backoff = ?self.config.error_backoff,
                    "Consume error, backing off"
                );
                self.pause(self.config.error_backoff).await;
                LoopState::Polling
            }
        }
    }

    async fn process(&mut self, message: ConsumedMessage) -> LoopState {
        let decoded = match codec::decode::<M>(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Undecodable message, routing to dead-letter queue"
                );
                self.dead_letter(e.to_string(), Some(&message.payload)).await;
                return LoopState::Committing {
                    message,
                    outcome: Outcome::DeadLettered,
                };
            }
        };

        match self.handler.handle(decoded).await {
            Ok(()) => LoopState::Committing {
                message,
                outcome: Outcome::Applied,
            },
            Err(e) => {
                self.counters.record_failure();
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Handler failed, message will be redelivered"
                );
                self.pause(self.config.redelivery_delay).await;
                LoopState::Polling
            }
        }
    }

    async fn commit(&mut self, message: ConsumedMessage, outcome: Outcome) -> LoopState {
        match self.consumer.commit(&message).await {
            Ok(()) => {
                debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Committed"
                );
                match outcome {
                    Outcome::Applied => self.counters.record_success(),
                    Outcome::DeadLettered => self.counters.record_dead_letter(),
                }
                LoopState::Polling
            }
            Err(e) if e.is_fatal() => {
                error!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Commit failed fatally"
                );
                // A dead-lettered message already has its record.
                if outcome == Outcome::Applied && !matches!(e, BrokerError::Closed) {
                    self.dead_letter(e.to_string(), Some(&message.payload)).await;
                }
                LoopState::Closing
            }
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Commit failed, message will be redelivered"
                );
                LoopState::Polling
            }
        }
    }

    /// Write a dead-letter record if this pipeline publishes them. Failures
    /// are logged only.
    async fn dead_letter(&mut self, reason: String, raw: Option<&Bytes>) {
        let DeadLetterPolicy::Publish(dead_letters) = &self.dead_letters else {
            debug!(topic = self.consumer.topic(), %reason, "Dead-letter record skipped");
            return;
        };
        let record = DeadLetterRecord {
            original_topic: self.consumer.topic().to_string(),
            error: reason,
            message: raw.map(|payload| String::from_utf8_lossy(payload).into_owned()),
            timestamp: OffsetDateTime::now_utc(),
        };
        if let Err(e) = dead_letters.publish_dead_letter(&record).await {
            error!(
                topic = %record.original_topic,
                error = %e,
                "Failed to write dead-letter record"
            );
        }
    }

    /// Sleep, returning early on shutdown.
    async fn pause(&mut self, duration: Duration) {
        tokio::select! {
            biased;
            _ = self.shutdown_rx.wait_for(|stop| *stop) => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
