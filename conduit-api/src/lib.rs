//! Conduit API - HTTP surface of the execution engine
//!
//! Agents call functions and list tool definitions with their `X-API-KEY`;
//! end users link third-party accounts through the OAuth2 routes.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod redirect;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use auth::AuthenticatedAgent;
pub use config::ConduitConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use redirect::RedirectAllowList;
pub use routes::create_api_router;
pub use state::AppState;
