//! TOML file configuration structures.
//!
//! These structs directly map to the `livescore.toml` file format. Every
//! section and field is optional; missing values take the defaults below.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub simulator: SimulatorConfig,
    pub publisher: PublisherConfig,
    pub consumer: ConsumerConfig,
    pub cache: CacheConfig,
    pub hub: HubConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Partitions per topic.
    pub partitions: u32,
    /// Records kept per partition, read or not.
    pub retention_records: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 6,
            retention_records: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub match_count: usize,
    pub tick_interval_ms: u64,
    pub half_time_pause_ms: u64,
    pub error_backoff_ms: u64,
    pub metrics_interval_ms: u64,
    pub player_update_every: u32,
    pub players_per_update: usize,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            match_count: 20,
            tick_interval_ms: 100,
            half_time_pause_ms: 5_000,
            error_backoff_ms: 1_000,
            metrics_interval_ms: 10_000,
            player_update_every: 5,
            players_per_update: 4,
            seed: None,
        }
    }
}

/// Acknowledgement level as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcksSetting {
    None,
    Leader,
    #[default]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub linger_ms: u64,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub flush_timeout_ms: u64,
    pub acks: AcksSetting,
    pub idempotent: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            linger_ms: 10,
            batch_size: 32 * 1024,
            max_in_flight: 5,
            max_retries: 3,
            retry_backoff_ms: 100,
            flush_timeout_ms: 10_000,
            acks: AcksSetting::All,
            idempotent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub ingest_group_prefix: String,
    pub notification_group_prefix: String,
    pub poll_timeout_ms: u64,
    pub error_backoff_ms: u64,
    pub redelivery_delay_ms: u64,
    pub metrics_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            ingest_group_prefix: "ingest-service-group".to_string(),
            notification_group_prefix: "notification-service-group".to_string(),
            poll_timeout_ms: 1_000,
            error_backoff_ms: 1_000,
            redelivery_delay_ms: 100,
            metrics_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub score_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            score_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub outbound_buffer: usize,
    pub backplane_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            backplane_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[broker]
partitions = 12
retention_records = 500

[simulator]
match_count = 8
tick_interval_ms = 50
seed = 42

[publisher]
acks = "leader"
idempotent = false

[consumer]
ingest_group_prefix = "ingest-a"
poll_timeout_ms = 250

[cache]
score_ttl_secs = 60

[hub]
outbound_buffer = 32
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.broker.partitions, 12);
        assert_eq!(config.broker.retention_records, 500);
        assert_eq!(config.simulator.match_count, 8);
        assert_eq!(config.simulator.half_time_pause_ms, 5_000);
        assert_eq!(config.simulator.seed, Some(42));
        assert_eq!(config.publisher.acks, AcksSetting::Leader);
        assert!(!config.publisher.idempotent);
        assert_eq!(config.consumer.ingest_group_prefix, "ingest-a");
        assert_eq!(
            config.consumer.notification_group_prefix,
            "notification-service-group"
        );
        assert_eq!(config.cache.score_ttl_secs, 60);
        assert_eq!(config.hub.outbound_buffer, 32);
        assert_eq!(config.hub.backplane_capacity, 1024);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.simulator.tick_interval_ms, 100);
        assert_eq!(config.publisher.acks, AcksSetting::All);
    }
}
