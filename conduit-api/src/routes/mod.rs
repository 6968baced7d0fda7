//! REST API Routes Module
//!
//! - Function execution and discovery (agent-authenticated)
//! - Linked account creation (OAuth2, API key, HTTP basic, no-auth, defaults)
//! - Linked account listing and owner actions
//! - Health check

pub mod functions;
pub mod health;
pub mod linked_accounts;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full router over shared state.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/functions", get(functions::list_functions))
        .route("/v1/functions/:name/execute", post(functions::execute_function))
        .route(
            "/v1/linked-accounts",
            get(linked_accounts::list_linked_accounts),
        )
        .route(
            "/v1/linked-accounts/api-key",
            post(linked_accounts::link_api_key),
        )
        .route(
            "/v1/linked-accounts/http-basic",
            post(linked_accounts::link_http_basic),
        )
        .route(
            "/v1/linked-accounts/no-auth",
            post(linked_accounts::link_no_auth),
        )
        .route(
            "/v1/linked-accounts/default",
            post(linked_accounts::link_default),
        )
        .route(
            "/v1/linked-accounts/oauth2",
            get(linked_accounts::oauth2_authorize),
        )
        .route(
            "/v1/linked-accounts/oauth2/callback",
            get(linked_accounts::oauth2_callback),
        )
        .route(
            "/v1/linked-accounts/:id",
            get(linked_accounts::get_linked_account)
                .patch(linked_accounts::update_linked_account)
                .delete(linked_accounts::delete_linked_account),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
