//! WebSocket client for the `/sportshub` push transport.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! shared types do not pull in a WebSocket stack.

mod hub;

pub use hub::HubClient;

/// Errors produced by the SDK clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server closed the connection.
    #[error("connection closed")]
    Closed,
}
