//! API Configuration Module
//!
//! Server, storage and engine settings loaded from `CONDUIT_*` environment
//! variables with development defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use conduit_core::ConfigError;
use conduit_engine::{EngineConfig, PolicyFallback};
use secrecy::{ExposeSecret, SecretString};

use crate::constants::{
    DEFAULT_BIND_HOST, DEFAULT_CATALOG_PATH, DEFAULT_DIRECTORY_PATH,
    DEFAULT_OAUTH2_STATE_TTL_SECS, DEFAULT_PORT, DEFAULT_PUBLIC_BASE_URL,
    MIN_STATE_SECRET_LENGTH, OAUTH2_CALLBACK_PATH,
};
use crate::redirect::{origin_of, RedirectAllowList};

// ============================================================================
// CONDUIT CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConduitConfig {
    // ========================================================================
    // Server
    // ========================================================================
    pub host: String,
    pub port: u16,

    /// Externally reachable base URL; the OAuth2 redirect URI hangs off it.
    pub public_base_url: String,

    // ========================================================================
    // Storage
    // ========================================================================
    pub catalog_path: PathBuf,
    pub directory_path: PathBuf,

    /// Base64 AES-256 key for credentials at rest. A random key is generated
    /// when unset, which makes stored credentials unreadable after restart.
    pub encryption_key: Option<SecretString>,

    // ========================================================================
    // OAuth2 linking
    // ========================================================================
    pub state_secret: Option<SecretString>,
    pub oauth2_state_ttl_secs: i64,

    /// Extra origins `after_redirect_url` may point at. The public base URL
    /// origin is always allowed.
    pub allowed_redirect_origins: Vec<String>,

    // ========================================================================
    // Engine
    // ========================================================================
    pub engine: EngineConfig,

    /// External policy evaluator. Rule-based evaluation is used when unset.
    pub policy_endpoint: Option<String>,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            directory_path: PathBuf::from(DEFAULT_DIRECTORY_PATH),
            encryption_key: None,
            state_secret: None,
            oauth2_state_ttl_secs: DEFAULT_OAUTH2_STATE_TTL_SECS,
            allowed_redirect_origins: Vec::new(),
            engine: EngineConfig::default(),
            policy_endpoint: None,
        }
    }
}

impl ConduitConfig {
    /// Create ConduitConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CONDUIT_HOST`: Bind host (default: 0.0.0.0)
    /// - `CONDUIT_PORT` or `PORT`: Bind port (default: 8000)
    /// - `CONDUIT_PUBLIC_BASE_URL`: Public base URL (default: http://localhost:8000)
    /// - `CONDUIT_CATALOG_PATH`: Catalog JSON file (default: catalog.json)
    /// - `CONDUIT_DIRECTORY_PATH`: Projects/agents JSON file (default: directory.json)
    /// - `CONDUIT_ENCRYPTION_KEY`: Base64 32-byte credential key
    /// - `CONDUIT_STATE_SECRET`: OAuth2 state signing secret (required)
    /// - `CONDUIT_OAUTH2_STATE_TTL_SECS`: State token lifetime (default: 600)
    /// - `CONDUIT_ALLOWED_REDIRECT_ORIGINS`: Comma-separated post-link redirect origins
    /// - `CONDUIT_DISPATCH_TIMEOUT_MS`: Outbound call timeout (default: 30000)
    /// - `CONDUIT_REFRESH_TIMEOUT_MS`: Token endpoint timeout (default: 10000)
    /// - `CONDUIT_POLICY_TIMEOUT_MS`: Policy evaluator timeout (default: 5000)
    /// - `CONDUIT_POLICY_ENDPOINT`: External policy evaluator URL
    /// - `CONDUIT_POLICY_FALLBACK`: `fail_closed` or `rule_based` (default: fail_closed)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConduitConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let millis = |key: &str, default: Duration| {
            non_empty(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let engine = EngineConfig {
            dispatch_timeout: millis("CONDUIT_DISPATCH_TIMEOUT_MS", defaults.engine.dispatch_timeout),
            refresh_timeout: millis("CONDUIT_REFRESH_TIMEOUT_MS", defaults.engine.refresh_timeout),
            policy_timeout: millis("CONDUIT_POLICY_TIMEOUT_MS", defaults.engine.policy_timeout),
            policy_fallback: non_empty("CONDUIT_POLICY_FALLBACK")
                .and_then(|s| s.parse::<PolicyFallback>().ok())
                .unwrap_or(defaults.engine.policy_fallback),
        };

        Self {
            host: non_empty("CONDUIT_HOST").unwrap_or(defaults.host),
            port: non_empty("CONDUIT_PORT")
                .or_else(|| non_empty("PORT"))
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            public_base_url: non_empty("CONDUIT_PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            catalog_path: non_empty("CONDUIT_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            directory_path: non_empty("CONDUIT_DIRECTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.directory_path),
            encryption_key: non_empty("CONDUIT_ENCRYPTION_KEY").map(SecretString::from),
            state_secret: non_empty("CONDUIT_STATE_SECRET").map(SecretString::from),
            oauth2_state_ttl_secs: non_empty("CONDUIT_OAUTH2_STATE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|ttl: &i64| *ttl > 0)
                .unwrap_or(defaults.oauth2_state_ttl_secs),
            allowed_redirect_origins: non_empty("CONDUIT_ALLOWED_REDIRECT_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            engine,
            policy_endpoint: non_empty("CONDUIT_POLICY_ENDPOINT"),
        }
    }

    /// Check the settings the server cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self
            .state_secret
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "CONDUIT_STATE_SECRET".to_string(),
            })?;
        if secret.expose_secret().len() < MIN_STATE_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "CONDUIT_STATE_SECRET".to_string(),
                value: "[REDACTED]".to_string(),
                reason: format!("must be at least {} characters", MIN_STATE_SECRET_LENGTH),
            });
        }
        if let Some(bad) = self
            .allowed_redirect_origins
            .iter()
            .find(|o| origin_of(o).is_none())
        {
            return Err(ConfigError::InvalidValue {
                field: "CONDUIT_ALLOWED_REDIRECT_ORIGINS".to_string(),
                value: bad.clone(),
                reason: "must be an absolute http(s) URL".to_string(),
            });
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|e| ConfigError::InvalidValue {
            field: "CONDUIT_HOST".to_string(),
            value: addr.clone(),
            reason: format!("{}", e),
        })
    }

    /// Redirect URI registered with OAuth2 providers.
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.public_base_url, OAUTH2_CALLBACK_PATH)
    }

    pub fn redirect_allow_list(&self) -> RedirectAllowList {
        RedirectAllowList::new(
            std::iter::once(&self.public_base_url).chain(&self.allowed_redirect_origins),
        )
    }
}
