//! Publisher client.
//!
//! [`Publisher`] is a cheap, cloneable handle. Every publish is queued to a
//! single background [`BatchSender`] which:
//! - Assigns each record a producer sequence number exactly once
//! - Accumulates records until `linger` elapses or `batch_size` bytes are buffered
//! - Sends each batch from its own task, with at most `max_in_flight` outstanding
//! - Retries transient failures with exponential backoff, reusing sequence numbers
//!
//! A publish resolves once the broker has acknowledged its batch or the
//! retries are exhausted.

use crate::broker::{BrokerError, DeliveryReport, Producer, ProducerRecord};
use crate::config::PublisherConfig;
use crate::utils::calculate_retry_delay;
use bytes::Bytes;
use livescore_sdk::codec;
use livescore_sdk::objects::{DeadLetterRecord, EventEnvelope, PlayerUpdate, ScoreUpdate};
use livescore_sdk::topics::TopicMessage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Errors returned to publish callers.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker rejected the batch after all retries.
    #[error("publish failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("publisher has shut down")]
    Shutdown,

    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),
}

type Ack = oneshot::Sender<Result<DeliveryReport, PublishError>>;

enum PublishCommand {
    Record {
        topic: String,
        key: String,
        payload: Bytes,
        ack: Ack,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

struct Pending {
    record: ProducerRecord,
    ack: Ack,
}

/// Handle for publishing to the broker.
#[derive(Clone)]
pub struct Publisher {
    commands: mpsc::Sender<PublishCommand>,
}

impl Publisher {
    /// Start the background sender for `producer`.
    ///
    /// The sender stops after every handle has been dropped and all buffered
    /// records have been delivered.
    pub fn spawn(producer: Arc<dyn Producer>, config: PublisherConfig) -> (Self, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::channel(config.queue_capacity.max(1));
        let sender = BatchSender::new(producer, config, commands_rx);
        let handle = tokio::spawn(sender.run());
        (Self { commands }, handle)
    }

    /// Publish a raw payload under `key` and wait for its delivery report.
    pub async fn publish(
        &self,
        topic: &str,
        key: impl Into<String>,
        payload: Bytes,
    ) -> Result<DeliveryReport, PublishError> {
        let (ack, report) = oneshot::channel();
        self.commands
            .send(PublishCommand::Record {
                topic: topic.to_string(),
                key: key.into(),
                payload,
                ack,
            })
            .await
            .map_err(|_| PublishError::Shutdown)?;
        report.await.map_err(|_| PublishError::Shutdown)?
    }

    /// Serialize `value` as JSON and publish it.
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        key: impl Into<String>,
        value: &T,
    ) -> Result<DeliveryReport, PublishError> {
        let payload = codec::encode(value)?;
        self.publish(topic, key, Bytes::from(payload)).await
    }

    /// Publish a contract message on its own topic with its partition key.
    pub async fn publish_message<T>(&self, message: &T) -> Result<DeliveryReport, PublishError>
    where
        T: TopicMessage + Serialize,
    {
        self.publish_json(T::TOPIC, message.partition_key(), message)
            .await
    }

    pub async fn publish_event(
        &self,
        event: &EventEnvelope,
    ) -> Result<DeliveryReport, PublishError> {
        self.publish_message(event).await
    }

    pub async fn publish_score(&self, score: &ScoreUpdate) -> Result<DeliveryReport, PublishError> {
        self.publish_message(score).await
    }

    pub async fn publish_player_update(
        &self,
        update: &PlayerUpdate,
    ) -> Result<DeliveryReport, PublishError> {
        self.publish_message(update).await
    }

    pub async fn publish_dead_letter(
        &self,
        record: &DeadLetterRecord,
    ) -> Result<DeliveryReport, PublishError> {
        self.publish_message(record).await
    }

    /// Send everything buffered and wait until no batch is in flight.
    ///
    /// `timeout` covers queueing the flush request as well as the flush.
    pub async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        let flush = async {
            let (done, flushed) = oneshot::channel();
            self.commands
                .send(PublishCommand::Flush { done })
                .await
                .map_err(|_| PublishError::Shutdown)?;
            flushed.await.map_err(|_| PublishError::Shutdown)
        };
        tokio::time::timeout(timeout, flush)
            .await
            .map_err(|_| PublishError::FlushTimeout(timeout))?
    }
}

/// Background task that owns the producer and the batch buffer.
struct BatchSender {
    producer: Arc<dyn Producer>,
    config: PublisherConfig,
    commands: mpsc::Receiver<PublishCommand>,
    in_flight: Arc<Semaphore>,
    next_sequence: u64,
    buffer: Vec<Pending>,
    buffered_bytes: usize,
    linger_deadline: Option<Instant>,
}

impl BatchSender {
    fn new(
        producer: Arc<dyn Producer>,
        config: PublisherConfig,
        commands: mpsc::Receiver<PublishCommand>,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            producer,
            config,
            commands,
            in_flight,
            next_sequence: 0,
            buffer: Vec::new(),
            buffered_bytes: 0,
            linger_deadline: None,
        }
    }

    async fn run(mut self) {
        info!(
            producer_id = %self.producer.producer_id(),
            linger = ?self.config.linger,
            batch_size = self.config.batch_size,
            "Publisher started"
        );

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(PublishCommand::Record { topic, key, payload, ack }) => {
                        self.enqueue(topic, key, payload, ack);
                        if self.buffered_bytes >= self.config.batch_size {
                            self.dispatch().await;
                        }
                    }
                    Some(PublishCommand::Flush { done }) => {
                        self.dispatch().await;
                        self.wait_idle().await;
                        let _ = done.send(());
                    }
                    None => {
                        debug!("All publisher handles dropped");
                        break;
                    }
                },

                _ = linger_elapsed(self.linger_deadline) => {
                    self.dispatch().await;
                }
            }
        }

        self.dispatch().await;
        self.wait_idle().await;
        info!("Publisher shutdown complete");
    }

    fn enqueue(&mut self, topic: String, key: String, payload: Bytes, ack: Ack) {
        if self.buffer.is_empty() {
            self.linger_deadline = Some(Instant::now() + self.config.linger);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.buffered_bytes += payload.len();
        self.buffer.push(Pending {
            record: ProducerRecord {
                topic,
                key,
                payload,
                sequence,
            },
            ack,
        });
    }

    /// Hand the buffered records to a delivery task. Waits for an in-flight
    /// slot, which is what pushes back on publishers.
    async fn dispatch(&mut self) {
        self.linger_deadline = None;
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;

        let permit = match self.in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                for pending in batch {
                    let _ = pending.ack.send(Err(PublishError::Shutdown));
                }
                return;
            }
        };

        let producer = self.producer.clone();
        let max_retries = self.config.max_retries;
        let retry_backoff = self.config.retry_backoff;
        tokio::spawn(async move {
            deliver(producer, batch, max_retries, retry_backoff).await;
            drop(permit);
        });
    }

    async fn wait_idle(&self) {
        let permits = u32::try_from(self.config.max_in_flight.max(1)).unwrap_or(u32::MAX);
        let _ = self.in_flight.acquire_many(permits).await;
    }
}

async fn linger_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Send one batch, retrying transient failures, and resolve every ack.
async fn deliver(
    producer: Arc<dyn Producer>,
    batch: Vec<Pending>,
    max_retries: u32,
    retry_backoff: Duration,
) {
    let (records, acks): (Vec<_>, Vec<_>) = batch.into_iter().map(|p| (p.record, p.ack)).unzip();

    let mut attempt = 0;
    let outcome = loop {
        match producer.send(records.clone()).await {
            Ok(reports) => break Ok(reports),
            Err(e) if !e.is_fatal() && attempt < max_retries => {
                let delay = calculate_retry_delay(retry_backoff, attempt);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    records = records.len(),
                    delay = ?delay,
                    "Batch send failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(reports) => {
            debug!(records = reports.len(), "Batch acknowledged");
            for (ack, report) in acks.into_iter().zip(reports) {
                let _ = ack.send(Ok(report));
            }
        }
        Err(e) => {
            error!(error = %e, records = acks.len(), "Batch send failed permanently");
            for ack in acks {
                let _ = ack.send(Err(PublishError::Broker(e.clone())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker, ProducerSettings};
    use livescore_sdk::objects::MatchStatus;
    use livescore_sdk::topics::LIVE_SCORES;
    use time::OffsetDateTime;

    async fn publisher(broker: &MemoryBroker, config: PublisherConfig) -> Publisher {
        let producer = broker.producer(ProducerSettings::default()).await.unwrap();
        Publisher::spawn(producer, config).0
    }

    fn score(match_id: i64) -> ScoreUpdate {
        ScoreUpdate {
            match_id,
            home_score: 1,
            away_score: 0,
            minute: 12,
            status: MatchStatus::Live,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_message_uses_topic_and_key() {
        let broker = MemoryBroker::new(3);
        let publisher = publisher(&broker, PublisherConfig::default()).await;

        publisher.publish_score(&score(7)).await.unwrap();

        let records = broker.records(LIVE_SCORES).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "7");
        let decoded: ScoreUpdate = codec::decode(&records[0].payload).unwrap();
        assert_eq!(decoded.match_id, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_without_duplicates() {
        let broker = MemoryBroker::new(1);
        let publisher = publisher(&broker, PublisherConfig::default()).await;
        broker.fail_next_sends(2).await;

        publisher.publish_score(&score(1)).await.unwrap();

        assert_eq!(broker.records(LIVE_SCORES).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_broker_error() {
        let broker = MemoryBroker::new(1);
        let config = PublisherConfig {
            max_retries: 2,
            ..Default::default()
        };
        let publisher = publisher(&broker, config).await;
        broker.fail_next_sends(3).await;

        let result = publisher.publish_score(&score(1)).await;
        assert!(matches!(
            result,
            Err(PublishError::Broker(BrokerError::Transient(_)))
        ));
        assert!(broker.records(LIVE_SCORES).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_publishes_get_distinct_offsets() {
        let broker = MemoryBroker::new(1);
        let publisher = publisher(&broker, PublisherConfig::default()).await;

        let (first, second) = (score(1), score(2));
        let (a, b) = tokio::join!(
            publisher.publish_score(&first),
            publisher.publish_score(&second)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.partition, b.partition);
        assert_ne!(a.offset, b.offset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_buffered_records() {
        let broker = MemoryBroker::new(1);
        let config = PublisherConfig {
            linger: Duration::from_secs(60),
            ..Default::default()
        };
        let publisher = publisher(&broker, config).await;

        let pending = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish_score(&score(3)).await })
        };
        tokio::task::yield_now().await;

        publisher.flush(Duration::from_secs(1)).await.unwrap();
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(broker.records(LIVE_SCORES).await.len(), 1);
    }

    /// Accepts batches and never answers.
    struct Stalled;

    #[async_trait::async_trait]
    impl Producer for Stalled {
        fn producer_id(&self) -> crate::broker::ProducerId {
            uuid::Uuid::nil()
        }

        async fn send(&self, _batch: Vec<ProducerRecord>) -> Result<Vec<DeliveryReport>, BrokerError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_times_out_when_queue_is_full() {
        let config = PublisherConfig {
            queue_capacity: 1,
            max_in_flight: 1,
            batch_size: 1,
            ..Default::default()
        };
        let (publisher, _) = Publisher::spawn(Arc::new(Stalled), config);

        // First batch holds the only in-flight slot, the second blocks the
        // sender on it, the third fills the queue.
        for match_id in 1..=3 {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                let _ = publisher.publish_score(&score(match_id)).await;
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let result = publisher.flush(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PublishError::FlushTimeout(_))));
    }
}
