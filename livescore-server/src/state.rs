//! Application state shared across all request handlers.

use livescore_core::hub::Hub;
use sqlx::PgPool;
use tokio::sync::watch;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Hub instance the WebSocket connections of this process join.
    pub hub: Hub,
    /// Relational store, when one is configured.
    pub db: Option<PgPool>,
    /// Flips to `true` once shutdown has started.
    pub shutdown_rx: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(hub: Hub, db: Option<PgPool>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            hub,
            db,
            shutdown_rx,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
