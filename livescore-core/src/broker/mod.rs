//! Message broker seams.
//!
//! The broker is an external collaborator. These traits describe the
//! subset of a partitioned, consumer-group based log that the pipeline
//! relies on:
//!
//! - [`Producer`]: batched, keyed appends with delivery reports
//! - [`Consumer`]: bounded-wait polling and explicit offset commits
//! - [`Broker`]: factory for both, scoped by consumer group
//!
//! [`MemoryBroker`] is an in-process implementation used by the binary and
//! by tests.

pub mod memory;

pub use memory::MemoryBroker;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identity of a producer instance, used for idempotent de-duplication.
pub type ProducerId = Uuid;

/// Errors surfaced by broker clients.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Retriable failure (timeout, leader change, throttling).
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Unrecoverable failure. `raw` holds whatever payload was in flight.
    #[error("fatal broker error: {reason}")]
    Fatal { reason: String, raw: Option<Bytes> },

    /// The client or broker has been shut down.
    #[error("broker client closed")]
    Closed,
}

impl BrokerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Fatal { .. } | BrokerError::Closed)
    }

    /// Best-effort payload captured with the error.
    pub fn raw_payload(&self) -> Option<&Bytes> {
        match self {
            BrokerError::Fatal { raw, .. } => raw.as_ref(),
            _ => None,
        }
    }
}

/// Acknowledgement level requested by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    /// Fire and forget.
    None,
    /// Partition leader has written the record.
    Leader,
    /// Every in-sync replica has written the record.
    #[default]
    All,
}

/// Delivery settings a producer is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    pub acks: Acks,
    /// Drop records whose (producer, sequence) was already appended.
    pub idempotent: bool,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            acks: Acks::All,
            idempotent: true,
        }
    }
}

/// A record handed to [`Producer::send`].
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
    /// Per-producer sequence number, stable across retries.
    pub sequence: u64,
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub partition: u32,
    /// `None` when the record was sent with [`Acks::None`].
    pub offset: Option<u64>,
}

/// A record returned by [`Consumer::poll`].
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Bytes,
    pub timestamp: OffsetDateTime,
}

#[async_trait]
pub trait Producer: Send + Sync {
    fn producer_id(&self) -> ProducerId;

    /// Append a batch. The batch is all-or-nothing; reports are returned in
    /// record order.
    async fn send(&self, batch: Vec<ProducerRecord>) -> Result<Vec<DeliveryReport>, BrokerError>;
}

/// A consumer-group member subscribed to a single topic.
#[async_trait]
pub trait Consumer: Send {
    fn group_id(&self) -> &str;

    fn topic(&self) -> &str;

    /// Wait up to `timeout` for the next record. `Ok(None)` on timeout.
    ///
    /// Records are served from the group's committed position, so a
    /// record that was polled but never committed is served again.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, BrokerError>;

    /// Synchronously commit `message`, moving the group's position past it.
    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), BrokerError>;

    /// Leave the consumer group.
    async fn close(&mut self);
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn producer(&self, settings: ProducerSettings) -> Result<Arc<dyn Producer>, BrokerError>;

    async fn consumer(&self, group_id: &str, topic: &str) -> Result<Box<dyn Consumer>, BrokerError>;
}
