//! Tick loop driving the [`Simulator`] and publishing what it emits.

use super::{MatchEmissions, Simulator};
use crate::config::SimulatorConfig;
use crate::events::Emission;
use crate::metrics::{ThroughputCounters, ThroughputReporter};
use crate::publisher::Publisher;
use futures_util::future::join_all;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Owns the simulator and publishes one tick at a time.
///
/// Matches are published concurrently; the emissions of a single match go
/// out one after another so their partition order matches the tick order.
/// Any publish failure in a tick delays the next tick by `error_backoff`
/// instead of `tick_interval`.
pub struct SimulatorRunner<R> {
    simulator: Simulator<R>,
    publisher: Publisher,
    config: SimulatorConfig,
    counters: Arc<ThroughputCounters>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Publish outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub published: u64,
    pub failed: u64,
}

impl TickOutcome {
    fn merge(self, other: TickOutcome) -> TickOutcome {
        TickOutcome {
            published: self.published + other.published,
            failed: self.failed + other.failed,
        }
    }
}

impl<R: Rng + Send> SimulatorRunner<R> {
    pub fn new(
        simulator: Simulator<R>,
        publisher: Publisher,
        config: SimulatorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let counters = ThroughputCounters::new();
        counters.set_live(simulator.live_count());
        Self {
            simulator,
            publisher,
            config,
            counters,
            shutdown_rx,
        }
    }

    pub fn counters(&self) -> Arc<ThroughputCounters> {
        self.counters.clone()
    }

    pub fn simulator(&self) -> &Simulator<R> {
        &self.simulator
    }

    /// Run until shutdown. The tick in progress is always completed.
    pub async fn run(mut self) {
        info!(
            matches = self.simulator.matches().len(),
            tick_interval = ?self.config.tick_interval,
            "Simulator started"
        );

        let reporter = ThroughputReporter::new(
            "simulator",
            self.counters.clone(),
            self.config.metrics_interval,
            self.shutdown_rx.clone(),
        );
        let reporter_handle = tokio::spawn(reporter.run());

        loop {
            if *self.shutdown_rx.borrow() {
                info!("Simulator received shutdown signal");
                break;
            }

            let outcome = self.run_tick().await;
            let delay = if outcome.failed > 0 {
                warn!(
                    failed = outcome.failed,
                    backoff = ?self.config.error_backoff,
                    "Tick had publish failures, backing off"
                );
                self.config.error_backoff
            } else {
                self.config.tick_interval
            };

            tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Simulator received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = reporter_handle.await;
        info!("Simulator shutdown complete");
    }

    /// Advance the simulation by one tick and publish the result, including
    /// the restart of matches that finished in this tick.
    pub async fn run_tick(&mut self) -> TickOutcome {
        let advanced = self.simulator.tick(Instant::now());
        let outcome = dispatch(&self.publisher, advanced).await;

        let restarted = self.simulator.restart_finished();
        let outcome = outcome.merge(dispatch(&self.publisher, restarted).await);

        self.counters.record_successes(outcome.published);
        self.counters.record_failures(outcome.failed);
        self.counters.set_live(self.simulator.live_count());
        outcome
    }
}

async fn dispatch(publisher: &Publisher, groups: Vec<MatchEmissions>) -> TickOutcome {
    join_all(
        groups
            .into_iter()
            .map(|group| publish_match(publisher, group)),
    )
    .await
    .into_iter()
    .fold(TickOutcome::default(), TickOutcome::merge)
}

async fn publish_match(publisher: &Publisher, group: MatchEmissions) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    for emission in group.emissions {
        let result = match &emission {
            Emission::Event(event) => publisher.publish_event(event).await,
            Emission::Score(score) => publisher.publish_score(score).await,
            Emission::Player(update) => publisher.publish_player_update(update).await,
        };
        match result {
            Ok(_) => outcome.published += 1,
            Err(e) => {
                error!(
                    match_id = group.match_id,
                    topic = emission.topic(),
                    error = %e,
                    "Failed to publish emission"
                );
                outcome.failed += 1;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker, ProducerSettings};
    use crate::config::PublisherConfig;
    use crate::simulator::MatchState;
    use livescore_sdk::objects::MatchStatus;
    use livescore_sdk::topics::{INGEST_EVENTS, LIVE_SCORES};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;
    use time::OffsetDateTime;

    async fn runner(
        broker: &MemoryBroker,
        matches: Vec<MatchState>,
        publisher_config: PublisherConfig,
    ) -> (SimulatorRunner<StdRng>, watch::Sender<bool>) {
        let producer = broker.producer(ProducerSettings::default()).await.unwrap();
        let (publisher, _) = Publisher::spawn(producer, publisher_config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = SimulatorConfig::default();
        let simulator =
            Simulator::with_matches(config.clone(), StdRng::seed_from_u64(5), matches);
        (
            SimulatorRunner::new(simulator, publisher, config, shutdown_rx),
            shutdown_tx,
        )
    }

    fn at_minute(match_id: i64, minute: u32) -> MatchState {
        let mut state = MatchState::new(match_id, 1, 2, 1, OffsetDateTime::now_utc());
        state.minute = minute;
        state.status = MatchStatus::Live;
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_time_tick_publishes_restart() {
        let broker = MemoryBroker::new(2);
        let (mut runner, _shutdown) =
            runner(&broker, vec![at_minute(1, 89)], PublisherConfig::default()).await;

        let outcome = runner.run_tick().await;

        // FullTime event + score, then kick-off event + score.
        assert_eq!(outcome.published, 4);
        assert_eq!(outcome.failed, 0);
        assert_eq!(broker.records(INGEST_EVENTS).await.len(), 2);
        assert_eq!(broker.records(LIVE_SCORES).await.len(), 2);

        let state = runner.simulator().match_state(1).unwrap();
        assert_eq!(state.status, MatchStatus::Live);
        assert_eq!(state.minute, 0);
        assert_eq!(runner.counters().snapshot().live, 1);
        assert_eq!(runner.counters().snapshot().succeeded, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_are_counted_not_fatal() {
        let broker = MemoryBroker::new(1);
        let config = PublisherConfig {
            max_retries: 0,
            ..Default::default()
        };
        let (mut runner, _shutdown) = runner(&broker, vec![at_minute(1, 44)], config).await;
        broker.fail_next_sends(100).await;

        let outcome = runner.run_tick().await;
        assert_eq!(outcome.published, 0);
        assert_eq!(outcome.failed, 2);

        // The match still moved on.
        let state = runner.simulator().match_state(1).unwrap();
        assert_eq!(state.status, MatchStatus::HalfTime);
        assert_eq!(runner.counters().snapshot().failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let broker = MemoryBroker::new(2);
        let (runner, shutdown_tx) =
            runner(&broker, vec![at_minute(1, 1), at_minute(2, 1)], PublisherConfig::default())
                .await;
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
