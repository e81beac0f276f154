//! Configuration module for livescore-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables, and converts it into the core config types.

pub mod file;

use crate::config::file::{AcksSetting, FileConfig};
use livescore_core::broker::{Acks, ProducerSettings};
use livescore_core::config::{
    CacheConfig, ConsumerConfig, HubConfig, PublisherConfig, SimulatorConfig,
};
use livescore_core::events::DEFAULT_CHANNEL_BUFFER;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Validated configuration of every component.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub partitions: u32,
    pub retention_records: usize,
    pub simulator: SimulatorConfig,
    pub seed: Option<u64>,
    pub publisher: PublisherConfig,
    pub consumer: ConsumerConfig,
    pub ingest_group_prefix: String,
    pub notification_group_prefix: String,
    pub cache: CacheConfig,
    pub hub: HubConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read, override, validate and convert.
    ///
    /// A missing file is not an error: every setting has a default.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let mut file_config = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.config_path.display(),
                    "Config file not found, using defaults"
                );
                FileConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        Ok(convert(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let rules = [
        (config.simulator.match_count == 0, "simulator.match_count must be at least 1"),
        (config.broker.partitions == 0, "broker.partitions must be at least 1"),
        (config.broker.retention_records == 0, "broker.retention_records must be at least 1"),
        (config.simulator.tick_interval_ms == 0, "simulator.tick_interval_ms must be positive"),
        (config.publisher.max_in_flight == 0, "publisher.max_in_flight must be at least 1"),
        (config.consumer.poll_timeout_ms == 0, "consumer.poll_timeout_ms must be positive"),
        (
            config.consumer.ingest_group_prefix.is_empty()
                || config.consumer.notification_group_prefix.is_empty(),
            "consumer group prefixes must not be empty",
        ),
        (
            config.consumer.ingest_group_prefix == config.consumer.notification_group_prefix,
            "ingest and notification consumers need distinct group prefixes",
        ),
    ];
    match rules.into_iter().find(|(violated, _)| *violated) {
        Some((_, message)) => Err(ConfigError::Validation(message.to_string())),
        None => Ok(()),
    }
}

fn convert(file: FileConfig) -> LoadedConfig {
    let ms = Duration::from_millis;
    LoadedConfig {
        listen: file.server.listen,
        partitions: file.broker.partitions,
        retention_records: file.broker.retention_records,
        simulator: SimulatorConfig {
            match_count: file.simulator.match_count,
            tick_interval: ms(file.simulator.tick_interval_ms),
            half_time_pause: ms(file.simulator.half_time_pause_ms),
            error_backoff: ms(file.simulator.error_backoff_ms),
            metrics_interval: ms(file.simulator.metrics_interval_ms),
            player_update_every: file.simulator.player_update_every,
            players_per_update: file.simulator.players_per_update,
        },
        seed: file.simulator.seed,
        publisher: PublisherConfig {
            linger: ms(file.publisher.linger_ms),
            batch_size: file.publisher.batch_size,
            max_in_flight: file.publisher.max_in_flight,
            max_retries: file.publisher.max_retries,
            retry_backoff: ms(file.publisher.retry_backoff_ms),
            flush_timeout: ms(file.publisher.flush_timeout_ms),
            queue_capacity: DEFAULT_CHANNEL_BUFFER,
            producer: ProducerSettings {
                acks: match file.publisher.acks {
                    AcksSetting::None => Acks::None,
                    AcksSetting::Leader => Acks::Leader,
                    AcksSetting::All => Acks::All,
                },
                idempotent: file.publisher.idempotent,
            },
        },
        consumer: ConsumerConfig {
            poll_timeout: ms(file.consumer.poll_timeout_ms),
            error_backoff: ms(file.consumer.error_backoff_ms),
            redelivery_delay: ms(file.consumer.redelivery_delay_ms),
            metrics_interval: ms(file.consumer.metrics_interval_ms),
        },
        ingest_group_prefix: file.consumer.ingest_group_prefix,
        notification_group_prefix: file.consumer.notification_group_prefix,
        cache: CacheConfig {
            score_ttl: Duration::from_secs(file.cache.score_ttl_secs),
        },
        hub: HubConfig {
            outbound_buffer: file.hub.outbound_buffer,
            backplane_capacity: file.hub.backplane_capacity,
        },
    }
}

/// The database URL from the environment, if a relational store is
/// configured.
pub fn get_database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert_to_design_targets() {
        let config = convert(FileConfig::default());
        assert_eq!(config.simulator.tick_interval, Duration::from_millis(100));
        assert_eq!(config.simulator.half_time_pause, Duration::from_secs(5));
        assert_eq!(config.publisher.flush_timeout, Duration::from_secs(10));
        assert_eq!(config.publisher.producer, ProducerSettings::default());
        assert_eq!(config.consumer.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.cache.score_ttl, Duration::from_secs(300));
        assert_eq!(config.notification_group_prefix, "notification-service-group");
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = FileConfig::default();
        config.simulator.match_count = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = FileConfig::default();
        config.broker.partitions = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = FileConfig::default();
        config.broker.retention_records = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = FileConfig::default();
        config.publisher.max_in_flight = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        assert!(validate(&FileConfig::default()).is_ok());
    }

    #[test]
    fn test_shared_group_prefix_is_rejected() {
        let mut config = FileConfig::default();
        config.consumer.notification_group_prefix = config.consumer.ingest_group_prefix.clone();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file_and_listen_override() {
        let loader = ConfigLoader::new(
            "/nonexistent/livescore.toml",
            Some("127.0.0.1:9999".parse().unwrap()),
        );
        let config = loader.load().unwrap();
        assert_eq!(config.listen.port(), 9999);
        assert_eq!(config.partitions, 6);
    }
}
