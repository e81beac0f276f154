//! Event channel factories and handles.
//!
//! Provides factory functions for creating the channels that connect the
//! hub to its connections and to the backplane.

use super::types::GroupBroadcast;
use livescore_sdk::objects::HubServerMessage;
use tokio::sync::{broadcast, mpsc};

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for frames pushed to one connection.
pub type OutboundSender = mpsc::Sender<HubServerMessage>;
/// Receiver handle for frames pushed to one connection.
pub type OutboundReceiver = mpsc::Receiver<HubServerMessage>;

/// Sender handle for the in-memory backplane.
pub type BackplaneSender = broadcast::Sender<GroupBroadcast>;
/// Receiver handle for the in-memory backplane.
pub type BackplaneReceiver = broadcast::Receiver<GroupBroadcast>;

/// Create a new outbound channel for one connection.
///
/// A full channel means the client is not keeping up; the hub drops frames
/// for it rather than waiting.
pub fn outbound_channel(buffer: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Create a new backplane channel.
///
/// Subscribers that fall more than `capacity` messages behind skip ahead.
pub fn backplane_channel(capacity: usize) -> (BackplaneSender, BackplaneReceiver) {
    broadcast::channel(capacity.max(1))
}
