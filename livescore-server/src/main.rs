//! Livescore Server
//!
//! Simulates live matches, streams their events through the broker into the
//! storage sinks and pushes them to WebSocket subscribers.

mod api;
mod config;
mod server;
mod services;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use server::{build_router, run_server};
use services::Services;
use shutdown::shutdown_signal;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Livescore - live sports event streaming pipeline
#[derive(Parser, Debug)]
#[command(name = "livescore-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./livescore.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LIVESCORE_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_json);

    tracing::info!("Starting livescore-server v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let db_pool = match get_database_url() {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            if args.migrate {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("../migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to run migrations: {}", e);
                        e
                    })?;
                tracing::info!("Migrations completed successfully");
            }
            Some(pool)
        }
        None => {
            if args.migrate {
                tracing::warn!("--migrate given without DATABASE_URL, nothing to migrate");
            }
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let services = Services::start(&config, db_pool.clone(), shutdown_rx.clone()).await?;

    let state = AppState::new(services.hub.clone(), db_pool.clone(), shutdown_rx);
    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", config.listen);
    let signal_tx = shutdown_tx.clone();
    let result = run_server(router, config.listen, async move {
        shutdown_signal().await;
        signal_tx.send_replace(true);
    })
    .await;

    // The server may also have stopped on a bind error.
    shutdown_tx.send_replace(true);
    services.stop().await;

    if let Some(pool) = db_pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
