//! Configuration types for the livescore pipeline.
//!
//! These types represent the validated runtime configuration used by the
//! pipeline components. Defaults carry the design targets. The actual config
//! loading/parsing is handled by the server crate.

use std::time::Duration;

use crate::broker::ProducerSettings;
use crate::events::DEFAULT_CHANNEL_BUFFER;

/// Match simulator settings.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Size of the live match pool.
    pub match_count: usize,
    /// One simulated minute per tick.
    pub tick_interval: Duration,
    /// How long a match stays at half-time before resuming.
    pub half_time_pause: Duration,
    /// Delay before the next tick after any publish failure.
    pub error_backoff: Duration,
    /// Throughput reporting interval.
    pub metrics_interval: Duration,
    /// Player statistics are emitted every this many minutes.
    pub player_update_every: u32,
    /// Players per statistics batch.
    pub players_per_update: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            match_count: 20,
            tick_interval: Duration::from_millis(100),
            half_time_pause: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(10),
            player_update_every: 5,
            players_per_update: 4,
        }
    }
}

/// Publisher client settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// How long a record may wait for companions before its batch is sent.
    pub linger: Duration,
    /// A batch is sent as soon as its payloads reach this many bytes.
    pub batch_size: usize,
    /// Maximum number of unacknowledged batches.
    pub max_in_flight: usize,
    /// Retries per batch after the first attempt.
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff: Duration,
    /// Upper bound for the shutdown flush.
    pub flush_timeout: Duration,
    /// Capacity of the publish request queue.
    pub queue_capacity: usize,
    pub producer: ProducerSettings,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            linger: Duration::from_millis(10),
            batch_size: 32 * 1024,
            max_in_flight: 5,
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            flush_timeout: Duration::from_secs(10),
            queue_capacity: DEFAULT_CHANNEL_BUFFER,
            producer: ProducerSettings::default(),
        }
    }
}

/// Consumer loop settings, shared by every topic loop of a pipeline.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Bounded wait of a single poll.
    pub poll_timeout: Duration,
    /// Pause after a non-fatal broker error.
    pub error_backoff: Duration,
    /// Pause after a handler failure, before the message is served again.
    pub redelivery_delay: Duration,
    /// Throughput reporting interval.
    pub metrics_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            redelivery_delay: Duration::from_millis(100),
            metrics_interval: Duration::from_secs(10),
        }
    }
}

/// Score cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub score_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            score_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Notification hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before new ones are dropped.
    pub outbound_buffer: usize,
    /// Messages retained by the in-memory backplane for slow subscribers.
    pub backplane_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_CHANNEL_BUFFER,
            backplane_capacity: 1024,
        }
    }
}
