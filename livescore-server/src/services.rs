//! Construction and ordered teardown of the pipeline tasks.

use crate::config::LoadedConfig;
use anyhow::Context;
use livescore_core::broker::{Broker, MemoryBroker};
use livescore_core::consumer::{ConsumerPipeline, DeadLetterPolicy};
use livescore_core::entities::matches::PgMatchStore;
use livescore_core::hub::{Hub, MemoryBackplane, NotificationRouter};
use livescore_core::ingestion::{IngestionFanout, Sinks};
use livescore_core::publisher::Publisher;
use livescore_core::simulator::{Simulator, SimulatorRunner};
use livescore_core::sinks::{
    MatchRow, MatchStore, MemoryDocumentStore, MemoryMatchStore, MemoryPlayerStats,
    MemoryScoreCache, MemorySearchIndex,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Every long-running task of the process.
pub struct Services {
    pub hub: Hub,
    publisher: Publisher,
    publisher_task: JoinHandle<()>,
    simulator_task: JoinHandle<()>,
    delivery_task: JoinHandle<()>,
    ingest: ConsumerPipeline,
    notify: ConsumerPipeline,
    config: LoadedConfig,
}

impl Services {
    pub async fn start(
        config: &LoadedConfig,
        db: Option<PgPool>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let simulator = Simulator::new(config.simulator.clone(), rng);
        let rows: Vec<MatchRow> = simulator.matches().iter().map(MatchRow::from).collect();

        let matches: Arc<dyn MatchStore> = match db {
            Some(pool) => {
                let store = PgMatchStore::new(pool);
                let inserted = store
                    .seed(&rows)
                    .await
                    .context("failed to seed match rows")?;
                tracing::info!(inserted, "Match rows seeded");
                Arc::new(store)
            }
            None => {
                tracing::info!("DATABASE_URL not set, using in-memory match store");
                Arc::new(MemoryMatchStore::seeded(rows))
            }
        };

        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::with_retention(
            config.partitions,
            config.retention_records,
        ));
        let producer = broker
            .producer(config.publisher.producer)
            .await
            .context("failed to create producer")?;
        let (publisher, publisher_task) = Publisher::spawn(producer, config.publisher.clone());

        let runner = SimulatorRunner::new(
            simulator,
            publisher.clone(),
            config.simulator.clone(),
            shutdown_rx.clone(),
        );
        let simulator_task = tokio::spawn(runner.run());

        let fanout = Arc::new(IngestionFanout::new(
            Sinks {
                matches: matches.clone(),
                documents: Arc::new(MemoryDocumentStore::new()),
                search: Arc::new(MemorySearchIndex::new()),
                cache: Arc::new(MemoryScoreCache::new()),
                players: Arc::new(MemoryPlayerStats::new()),
            },
            config.cache.clone(),
        ));
        let mut ingest = ConsumerPipeline::new(
            "ingest",
            broker.clone(),
            DeadLetterPolicy::Publish(publisher.clone()),
            config.consumer.clone(),
            config.ingest_group_prefix.clone(),
            shutdown_rx.clone(),
        );
        fanout
            .attach(&mut ingest)
            .await
            .context("failed to start ingest consumers")?;
        ingest.spawn_reporter();

        let backplane = Arc::new(MemoryBackplane::new(config.hub.backplane_capacity));
        let (hub, delivery) = Hub::new(backplane, config.hub.clone());
        let delivery_task = tokio::spawn(delivery.run(shutdown_rx.clone()));

        let router = Arc::new(NotificationRouter::new(hub.clone(), matches));
        let mut notify = ConsumerPipeline::new(
            "notification",
            broker,
            DeadLetterPolicy::Skip,
            config.consumer.clone(),
            config.notification_group_prefix.clone(),
            shutdown_rx,
        );
        router
            .attach(&mut notify)
            .await
            .context("failed to start notification consumers")?;
        notify.spawn_reporter();

        Ok(Self {
            hub,
            publisher,
            publisher_task,
            simulator_task,
            delivery_task,
            ingest,
            notify,
            config: config.clone(),
        })
    }

    /// Wait for every loop to finish its current unit of work, then flush
    /// the publisher. The shutdown signal must already have been sent.
    pub async fn stop(self) {
        if let Err(e) = self.simulator_task.await {
            tracing::error!(error = %e, "Simulator task panicked");
        }
        self.ingest.wait().await;
        self.notify.wait().await;
        if let Err(e) = self.delivery_task.await {
            tracing::error!(error = %e, "Hub delivery task panicked");
        }

        tracing::info!("Flushing publisher...");
        match self.publisher.flush(self.config.publisher.flush_timeout).await {
            Ok(()) => tracing::info!("Publisher flushed"),
            Err(e) => tracing::warn!(error = %e, "Publisher flush incomplete"),
        }
        drop(self.publisher);
        if let Err(e) = self.publisher_task.await {
            tracing::error!(error = %e, "Publisher task panicked");
        }
    }
}
