//! larder registry server entry point.
//!
//! Boots the push subscription registry over HTTP.
//! Logs are JSON on stderr.

use anyhow::{Context, Result};
use larder_core::{AppConfig, RegistryDb, SubscriptionRegistry};
use tracing_subscriber::EnvFilter;

mod error;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let db = RegistryDb::open(&config.registry_db_path)
        .await
        .with_context(|| format!("opening {}", config.registry_db_path.display()))?;
    let state = routes::AppState::new(SubscriptionRegistry::new(db), config.registry_token());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "Starting larder registry");

    axum::serve(listener, routes::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
