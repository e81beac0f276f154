//! Event system connecting the pipeline stages.
//!
//! # Event Flow
//!
//! 1. The simulator produces [`Emission`]s per match and tick
//! 2. The publisher writes them to the broker topics
//! 3. Consumer loops decode them and hand them to the ingestion fan-out
//!    and the notification router
//! 4. The router wraps them in a [`GroupBroadcast`] on the backplane
//! 5. Each hub instance pushes the frame to its local group members over
//!    per-connection outbound channels
//!
//! Everything passed between stages is an owned snapshot.

pub mod channels;
pub mod types;

pub use channels::{
    BackplaneReceiver, BackplaneSender, DEFAULT_CHANNEL_BUFFER, OutboundReceiver, OutboundSender,
    backplane_channel, outbound_channel,
};

pub use types::{Emission, GroupBroadcast, GroupList};
