//! Etebase-compatible end-to-end encrypted synchronization server.
//!
//! Clients hold all encryption keys; this server stores opaque encrypted
//! blobs, authenticates users with a signature-based challenge, and
//! exposes an incremental synchronization API over hierarchical
//! collections of versioned items.

pub mod broker;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod ctx;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
pub mod tickets;
pub mod wire;

use std::net::SocketAddr;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::state::AppState;

pub async fn run() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    let config = Config::from_env()?;
    let port = config.port;
    let debug = config.debug;

    info!("=== Etebase Sync Server ===");
    info!("Database: {}", config.database_url);
    info!("Chunk storage: {:?}", config.chunk_storage_path);
    if debug {
        info!("DEBUG mode: host validation disabled");
    }

    let state = AppState::new(config).await?;
    let app = router::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("shutdown signal received, draining connections");
}
