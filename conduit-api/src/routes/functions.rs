//! Function REST API Routes
//!
//! Execution always answers 200 with an `ExecutionResult`; failures are
//! reported in its `error` field, categorized like every other error.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use conduit_core::{ExecutionRequest, ExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthenticatedAgent;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteFunctionRequest {
    /// Caller input keyed by parameter group.
    #[serde(default)]
    pub arguments: Value,
    pub linked_account_owner_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFunctionsQuery {
    pub app: Option<String>,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /v1/functions/:name/execute - Execute a function for a linked account
pub async fn execute_function(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Path(function_name): Path<String>,
    Json(req): Json<ExecuteFunctionRequest>,
) -> ApiResult<Json<ExecutionResult>> {
    if req.linked_account_owner_id.trim().is_empty() {
        return Err(ApiError::missing_field("linked_account_owner_id"));
    }

    let result = state
        .orchestrator
        .execute(ExecutionRequest {
            agent_id: agent.id,
            function_name,
            arguments: req.arguments,
            linked_account_owner_id: req.linked_account_owner_id,
        })
        .await;
    Ok(Json(result))
}

/// GET /v1/functions - Tool definitions the calling agent may use
pub async fn list_functions(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Query(query): Query<ListFunctionsQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let definitions = state
        .orchestrator
        .discover(agent.id, query.app.as_deref())?;
    Ok(Json(definitions))
}
