//! Health Check Endpoint
//!
//! No authentication required.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub apps: usize,
    pub functions: usize,
}

/// GET /health - Liveness plus catalog size
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.orchestrator.catalog().snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        apps: snapshot.app_count(),
        functions: snapshot.function_count(),
    })
}
