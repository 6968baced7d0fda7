//! Conduit API Server Entry Point
//!
//! Loads configuration, builds the engine from the catalog and directory
//! files, and serves the router. SIGHUP reloads the catalog in place.

use conduit_api::telemetry::{init_tracing, TelemetryConfig};
use conduit_api::{create_api_router, ApiError, ApiResult, AppState, ConduitConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = ConduitConfig::from_env();
    let state = AppState::build(&config)?;
    spawn_catalog_reloader(&state, &config);

    let app = create_api_router(state);
    let addr = config.bind_addr()?;
    tracing::info!(%addr, "Starting Conduit API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn spawn_catalog_reloader(state: &AppState, config: &ConduitConfig) {
    use tokio::signal::unix::{signal, SignalKind};

    let catalog = state.orchestrator.catalog().clone();
    let path = config.catalog_path.clone();
    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP handler unavailable, catalog reload disabled");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            match catalog.reload_from_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "Catalog reloaded"),
                // The previous snapshot stays in service.
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Catalog reload failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_catalog_reloader(_state: &AppState, _config: &ConduitConfig) {}
