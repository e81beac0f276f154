//! Consumer-group pipelines.
//!
//! A [`ConsumerPipeline`] runs one pull loop per topic. Each loop decodes the
//! topic's message type, hands it to a [`MessageHandler`] and commits the
//! offset only once the handler succeeded or the message was dead-lettered.
//! A failed handler leaves the offset uncommitted, so the same message is
//! served again.

mod topic_loop;

use crate::broker::{Broker, BrokerError};
use crate::config::ConsumerConfig;
use crate::metrics::{ThroughputCounters, ThroughputReporter};
use crate::publisher::Publisher;
use async_trait::async_trait;
use livescore_sdk::codec::WireSchema;
use livescore_sdk::topics::TopicMessage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use topic_loop::TopicLoop;
use tracing::{error, info};

/// Applies one decoded message.
///
/// Handlers must tolerate seeing the same message more than once.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, message: M) -> Result<(), Self::Error>;
}

/// What a pipeline does with a message it cannot use.
///
/// Only one of the groups reading a topic should publish, so each broken
/// record produces one dead-letter record.
#[derive(Clone)]
pub enum DeadLetterPolicy {
    /// Write a [`DeadLetterRecord`](livescore_sdk::objects::DeadLetterRecord),
    /// then commit.
    Publish(Publisher),
    /// Log, then commit.
    Skip,
}

/// A named set of topic loops sharing one consumer-group prefix, one
/// dead-letter policy and one set of counters.
pub struct ConsumerPipeline {
    name: &'static str,
    broker: Arc<dyn Broker>,
    dead_letters: DeadLetterPolicy,
    config: ConsumerConfig,
    group_prefix: String,
    counters: Arc<ThroughputCounters>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ConsumerPipeline {
    pub fn new(
        name: &'static str,
        broker: Arc<dyn Broker>,
        dead_letters: DeadLetterPolicy,
        config: ConsumerConfig,
        group_prefix: impl Into<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            broker,
            dead_letters,
            config,
            group_prefix: group_prefix.into(),
            counters: ThroughputCounters::new(),
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn counters(&self) -> Arc<ThroughputCounters> {
        self.counters.clone()
    }

    /// Consumer group used for `topic`.
    pub fn group_id(&self, topic: &str) -> String {
        format!("{}-{}", self.group_prefix, topic)
    }

    /// Join the topic's consumer group and start its loop.
    pub async fn spawn_topic<M, H>(&mut self, handler: Arc<H>) -> Result<(), BrokerError>
    where
        M: TopicMessage + WireSchema + Send + 'static,
        H: MessageHandler<M> + 'static,
    {
        let group_id = self.group_id(M::TOPIC);
        let consumer = self.broker.consumer(&group_id, M::TOPIC).await?;
        let topic_loop = TopicLoop::<M, H>::new(
            consumer,
            handler,
            self.dead_letters.clone(),
            self.config.clone(),
            self.counters.clone(),
            self.shutdown_rx.clone(),
        );
        info!(pipeline = self.name, topic = M::TOPIC, group_id, "Starting topic loop");
        self.handles.push(tokio::spawn(topic_loop.run()));
        Ok(())
    }

    /// Start the periodic throughput log of this pipeline.
    pub fn spawn_reporter(&mut self) {
        let reporter = ThroughputReporter::new(
            self.name,
            self.counters.clone(),
            self.config.metrics_interval,
            self.shutdown_rx.clone(),
        );
        self.handles.push(tokio::spawn(reporter.run()));
    }

    /// Wait for every loop to close.
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(pipeline = self.name, error = %e, "Pipeline task panicked");
            }
        }
        info!(pipeline = self.name, "Pipeline stopped");
    }
}
