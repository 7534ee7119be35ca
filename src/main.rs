//! natterd - the Natter API server.

use natter::api::{self, AppState};
use natter::clock::{SharedClock, SystemClock};
use natter::config::Config;
use natter::db::Database;
use natter::keys::KeyRing;
use natter::{http, metrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        base_url = %config.server.base_url,
        backend = config.tokens.backend.as_str(),
        macaroons = config.tokens.macaroons,
        model = ?config.authorization.model,
        "Starting natterd"
    );

    // Refuses short or malformed root secrets.
    let keys = KeyRing::from_config(&config.keys).map_err(|e| {
        error!(error = %e, "Failed to load root secret");
        e
    })?;

    let db = Database::new(&config.database.path).await?;
    let clock: SharedClock = Arc::new(SystemClock);

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    metrics::init();
    let metrics_port = config.server.metrics_port;
    if metrics_port == 0 {
        info!("Metrics endpoint disabled");
    } else {
        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    let state = AppState::from_config(&config, &keys, db, clock)?;

    // Start expired token cleanup task (database-backed tokens only)
    let interval_secs = config.tokens.cleanup_interval_secs;
    if interval_secs > 0 && state.tokens.database().is_some() {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let Some(store) = state.tokens.database() else {
                    break;
                };
                match store.delete_expired().await {
                    Ok(removed) if removed > 0 => {
                        info!(removed = removed, "Expired tokens deleted");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to delete expired tokens");
                    }
                }
            }
        });
        info!(interval_secs, "Token cleanup task started");
    }

    let listener = TcpListener::bind(config.listen.address).await?;
    info!(address = %config.listen.address, "API listening");
    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
