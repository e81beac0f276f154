//! Shared contract for the livescore pipeline.
//!
//! - [`objects`]: topic payloads and push-transport frames
//! - [`topics`]: topic names and partition-key rules
//! - [`codec`]: JSON encoding and case-insensitive decoding
//! - `client` (feature `client`): WebSocket client for the push transport

#![forbid(unsafe_code)]

pub mod codec;
pub mod objects;
pub mod topics;

#[cfg(feature = "client")]
pub mod client;
