//! Throughput counters and their periodic reporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// Counters shared between a pipeline and its reporter.
#[derive(Debug, Default)]
pub struct ThroughputCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    /// Live match gauge. Only the simulator writes it.
    live: AtomicUsize,
}

/// Point-in-time copy of [`ThroughputCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub live: usize,
}

impl ThroughputCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_successes(&self, count: u64) {
        self.succeeded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failures(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_live(&self, live: usize) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
        }
    }
}

/// Events per second over `elapsed`.
pub fn rate(delta: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    delta as f64 / elapsed.as_secs_f64()
}

/// Logs the success rate of a pipeline every `interval`.
pub struct ThroughputReporter {
    component: &'static str,
    counters: Arc<ThroughputCounters>,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ThroughputReporter {
    pub fn new(
        component: &'static str,
        counters: Arc<ThroughputCounters>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            component,
            counters,
            interval,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last = self.counters.snapshot();
        let mut last_at = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for(|stop| *stop) => {
                    break;
                }

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let current = self.counters.snapshot();
                    let per_second = rate(
                        current.succeeded.saturating_sub(last.succeeded),
                        now.duration_since(last_at),
                    );
                    info!(
                        component = self.component,
                        rate = format!("{per_second:.1}/s"),
                        total = current.succeeded,
                        failed = current.failed,
                        dead_lettered = current.dead_lettered,
                        live_matches = current.live,
                        "Throughput"
                    );
                    last = current;
                    last_at = now;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate() {
        assert_eq!(rate(500, Duration::from_secs(10)), 50.0);
        assert_eq!(rate(0, Duration::from_secs(10)), 0.0);
        assert_eq!(rate(10, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = ThroughputCounters::new();
        counters.record_successes(3);
        counters.record_success();
        counters.record_failure();
        counters.record_dead_letter();
        counters.set_live(20);

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                succeeded: 4,
                failed: 1,
                dead_lettered: 1,
                live: 20,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reporter = ThroughputReporter::new(
            "test",
            ThroughputCounters::new(),
            Duration::from_secs(10),
            shutdown_rx,
        );
        let handle = tokio::spawn(reporter.run());

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
