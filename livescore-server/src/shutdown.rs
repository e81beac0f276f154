//! Signal handling for graceful shutdown.

use tokio::signal::unix::{SignalKind, signal};

/// Wait for SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = wait_for(SignalKind::terminate()) => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = wait_for(SignalKind::interrupt()) => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Resolves on the first delivery of `kind`. Never resolves if the handler
/// cannot be installed.
async fn wait_for(kind: SignalKind) {
    match signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, ?kind, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
