//! Constants for Conduit API
//!
//! Default values and header names used throughout the API.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 8000;

/// Default public base URL, used to build the OAuth2 redirect URI
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8000";

/// Default catalog file path
pub const DEFAULT_CATALOG_PATH: &str = "catalog.json";

/// Default tenant directory file path
pub const DEFAULT_DIRECTORY_PATH: &str = "directory.json";

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Header carrying the agent API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default OAuth2 state token lifetime in seconds (10 minutes)
pub const DEFAULT_OAUTH2_STATE_TTL_SECS: i64 = 600;

/// Minimum length of the OAuth2 state signing secret
pub const MIN_STATE_SECRET_LENGTH: usize = 32;

/// Path of the OAuth2 callback route, relative to the public base URL
pub const OAUTH2_CALLBACK_PATH: &str = "/v1/linked-accounts/oauth2/callback";

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "conduit_api=debug,conduit_engine=debug,tower_http=info,info";
