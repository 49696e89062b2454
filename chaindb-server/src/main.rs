//! ChainDB Server - hosts the node's chain storage
//!
//! Opens the blockchain store (tuned from `LEVELDB_*` variables), exposes
//! health, statistics and Prometheus metrics over HTTP, and closes the store
//! on shutdown.

mod api;
mod config;
mod telemetry;

use anyhow::Context;
use chaindb_core::open_blockchain_storage_with_stats;
use config::ServerConfig;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let metrics = telemetry::init_metrics()?;

    let config = ServerConfig::from_env()?;

    info!(version = chaindb_core::VERSION, "starting ChainDB server");
    info!(data_dir = %config.data_dir.display(), http = %config.http_addr, "configuration");

    let (store, stats) = open_blockchain_storage_with_stats(&config.data_dir)
        .context("failed to open chain storage")?;

    let app = api::create_router(api::AppState {
        store: Arc::clone(&store),
        stats,
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "ChainDB server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, closing chain storage");
    store.close().context("failed to close chain storage")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
