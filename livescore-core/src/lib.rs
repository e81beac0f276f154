//! Engine of the livescore pipeline.
//!
//! - [`simulator`]: match simulation and the tick loop publishing it
//! - [`publisher`]: batching, idempotent publisher over a [`broker::Producer`]
//! - [`consumer`]: per-topic pull loops with commit-after-success
//! - [`ingestion`]: fan-out of consumed messages to the [`sinks`]
//! - [`hub`]: subscription registry and group broadcast

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod broker;
pub mod config;
pub mod consumer;
pub mod entities;
pub mod events;
pub mod framework;
pub mod hub;
pub mod ingestion;
pub mod metrics;
pub mod publisher;
pub mod simulator;
pub mod sinks;
pub mod utils;
