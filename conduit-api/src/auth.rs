//! Agent authentication
//!
//! Agents authenticate with the `X-API-KEY` header. The key is looked up by
//! its SHA-256 digest in the tenant directory; raw keys are never stored.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use conduit_core::Agent;

use crate::constants::API_KEY_HEADER;
use crate::error::ApiError;
use crate::state::AppState;

/// The Agent behind a request's API key.
#[derive(Debug, Clone)]
pub struct AuthenticatedAgent(pub Agent);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedAgent {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing X-API-KEY header"))?;

        let agent = state
            .orchestrator
            .directory()
            .agent_by_api_key(key)
            .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;
        Ok(Self(agent))
    }
}
