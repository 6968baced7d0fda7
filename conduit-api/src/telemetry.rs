//! Tracing subscriber setup
//!
//! JSON log lines filtered by `RUST_LOG`, with a crate-level default.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::DEFAULT_LOG_FILTER;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// Human-readable lines instead of JSON, for local development.
    pub pretty: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("CONDUIT_SERVICE_NAME")
                .unwrap_or_else(|_| "conduit-api".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            pretty: std::env::var("CONDUIT_LOG_PRETTY")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.pretty {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        "Telemetry initialized"
    );
    Ok(())
}
