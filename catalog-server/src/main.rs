//! MQTT catalog server
//!
//! Opens the catalog database (`DATABASE_URL`, or the SQLite file at
//! `SQLITE_PATH`), applies the schema, and serves the REST API on
//! `SERVER_ADDR` until Ctrl-C.

use anyhow::{Context, Result};
use catalog_core::SqlCatalogStore;
use catalog_server::{build_router, AppState, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    let store = SqlCatalogStore::connect(&config.database_url)
        .await
        .context("Failed to open catalog database")?;
    store.migrate().await.context("Failed to migrate catalog schema")?;
    info!(dialect = ?store.dialect(), "catalog store ready");

    let app = build_router(AppState::new(Arc::new(store)));

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "catalog API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("catalog server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!(error = %e, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
