//! Linked Account REST API Routes
//!
//! Linking routes are agent-authenticated and only link Apps the caller's
//! project has enabled, under the scheme that project configured. The
//! OAuth2 callback is reached by the provider redirect and trusts only the
//! signed state. Owner actions are limited to accounts of the caller's own
//! project.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{DateTime, Utc};
use conduit_core::{
    ApiKeyCredentials, App, AuthorizationError, ConduitError, HttpBasicCredentials, LinkedAccount,
    LinkedAccountId, LinkedAccountKey, ProjectId, SecurityCredentials, SecuritySchemeKind,
};
use std::sync::Arc;
use conduit_storage::CredentialStore as _;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedAgent;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeQuery {
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub after_redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined or the request was invalid.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Body of the no-auth and default-credentials link routes.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkAccountRequest {
    pub app_name: String,
    pub linked_account_owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyLinkRequest {
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpBasicLinkRequest {
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListLinkedAccountsQuery {
    pub app_name: Option<String>,
    pub linked_account_owner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLinkedAccountRequest {
    pub enabled: bool,
}

/// A LinkedAccount as shown to API callers: never any credential material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAccountResponse {
    pub id: LinkedAccountId,
    pub project_id: ProjectId,
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub security_scheme: SecuritySchemeKind,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<LinkedAccount> for LinkedAccountResponse {
    fn from(account: LinkedAccount) -> Self {
        Self {
            id: account.id,
            project_id: account.project_id,
            app_name: account.app_name,
            linked_account_owner_id: account.owner_id,
            security_scheme: account.security_scheme,
            enabled: account.enabled,
            created_at: account.created_at,
            updated_at: account.updated_at,
            last_used_at: account.last_used_at,
        }
    }
}

// ============================================================================
// OAUTH2 FLOW
// ============================================================================

/// GET /v1/linked-accounts/oauth2 - Start linking an OAuth2 account
pub async fn oauth2_authorize(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<Json<AuthorizeResponse>> {
    require_owner_id(&query.linked_account_owner_id)?;
    if let Some(url) = &query.after_redirect_url {
        check_redirect(&state, url)?;
    }
    let app = configured_app(&state, agent.project_id, &query.app_name)?;
    require_scheme(&app, SecuritySchemeKind::OAuth2)?;

    let url = state
        .orchestrator
        .credentials()
        .begin_link(
            &app.app,
            agent.project_id,
            &query.linked_account_owner_id,
            &state.redirect_uri,
            query.after_redirect_url,
        )
        .await?;
    Ok(Json(AuthorizeResponse { url }))
}

/// GET /v1/linked-accounts/oauth2/callback - Provider redirect target
pub async fn oauth2_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "OAuth2 provider returned an error");
        let message = match query.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(ApiError::new(ErrorCode::OAuth2Denied, message));
    }
    let token = query.state.ok_or_else(|| ApiError::missing_field("state"))?;
    let code = query.code.ok_or_else(|| ApiError::missing_field("code"))?;

    let credentials = state.orchestrator.credentials();
    let link = credentials.verify_state(&token)?;
    // The allow-list may have narrowed since the state was issued.
    if let Some(url) = &link.after_redirect_url {
        check_redirect(&state, url)?;
    }
    let app = state
        .orchestrator
        .catalog()
        .get_app(&link.app_name)
        .ok_or_else(|| ApiError::entity_not_found("App", &link.app_name))?;
    let account = credentials.complete_link(&app, &link, &code).await?;

    match link.after_redirect_url {
        Some(url) => Ok(Redirect::to(&url).into_response()),
        None => Ok(Json(LinkedAccountResponse::from(account)).into_response()),
    }
}

// ============================================================================
// DIRECT LINKING
// ============================================================================

/// POST /v1/linked-accounts/api-key - Link an account with its own API key
pub async fn link_api_key(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Json(req): Json<ApiKeyLinkRequest>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    if req.api_key.is_empty() {
        return Err(ApiError::missing_field("api_key"));
    }
    let credentials = SecurityCredentials::ApiKey(ApiKeyCredentials {
        secret_key: req.api_key,
    });
    link_direct(
        &state,
        agent.project_id,
        &req.app_name,
        &req.linked_account_owner_id,
        SecuritySchemeKind::ApiKey,
        Some(credentials),
    )
    .await
}

/// POST /v1/linked-accounts/http-basic - Link an account with a username and password
pub async fn link_http_basic(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Json(req): Json<HttpBasicLinkRequest>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    if req.username.is_empty() {
        return Err(ApiError::missing_field("username"));
    }
    let credentials = SecurityCredentials::HttpBasic(HttpBasicCredentials {
        username: req.username,
        password: req.password,
    });
    link_direct(
        &state,
        agent.project_id,
        &req.app_name,
        &req.linked_account_owner_id,
        SecuritySchemeKind::HttpBasic,
        Some(credentials),
    )
    .await
}

/// POST /v1/linked-accounts/no-auth - Link an account of an App that needs no credentials
pub async fn link_no_auth(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Json(req): Json<LinkAccountRequest>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    link_direct(
        &state,
        agent.project_id,
        &req.app_name,
        &req.linked_account_owner_id,
        SecuritySchemeKind::NoAuth,
        Some(SecurityCredentials::NoAuth),
    )
    .await
}

/// POST /v1/linked-accounts/default - Link an account that uses the App's default credentials
pub async fn link_default(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Json(req): Json<LinkAccountRequest>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    require_owner_id(&req.linked_account_owner_id)?;
    let app = configured_app(&state, agent.project_id, &req.app_name)?;
    if app.app.default_credentials(app.scheme).is_none() {
        return Err(ApiError::invalid_input(format!(
            "App {} has no default credentials for security scheme {}",
            app.app.name, app.scheme
        )));
    }
    let key = LinkedAccountKey::new(agent.project_id, &app.app.name, &req.linked_account_owner_id);
    let account = state
        .orchestrator
        .credentials()
        .link_account(&app.app, key, app.scheme, None)
        .await?;
    Ok(Json(account.into()))
}

async fn link_direct(
    state: &AppState,
    project_id: ProjectId,
    app_name: &str,
    owner_id: &str,
    scheme: SecuritySchemeKind,
    credentials: Option<SecurityCredentials>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    require_owner_id(owner_id)?;
    let app = configured_app(state, project_id, app_name)?;
    require_scheme(&app, scheme)?;
    let key = LinkedAccountKey::new(project_id, &app.app.name, owner_id);
    let account = state
        .orchestrator
        .credentials()
        .link_account(&app.app, key, scheme, credentials)
        .await?;
    Ok(Json(account.into()))
}

/// An App together with the scheme the project configured for it.
struct ConfiguredApp {
    app: Arc<App>,
    scheme: SecuritySchemeKind,
}

/// Resolve an App the project has enabled.
fn configured_app(state: &AppState, project_id: ProjectId, app_name: &str) -> ApiResult<ConfiguredApp> {
    let orchestrator = &state.orchestrator;
    let app = orchestrator
        .catalog()
        .get_app(app_name)
        .ok_or_else(|| ApiError::entity_not_found("App", app_name))?;
    let project = orchestrator
        .directory()
        .project(project_id)
        .ok_or_else(|| ApiError::entity_not_found("Project", project_id))?;
    let scheme = project
        .app_configuration(&app.name)
        .filter(|c| c.enabled)
        .map(|c| c.security_scheme)
        .ok_or_else(|| {
            ConduitError::from(AuthorizationError::AppNotConfigured {
                project_id,
                app_name: app.name.clone(),
            })
        })?;
    Ok(ConfiguredApp { app, scheme })
}

fn require_scheme(app: &ConfiguredApp, wanted: SecuritySchemeKind) -> ApiResult<()> {
    if app.scheme != wanted {
        return Err(ApiError::forbidden(format!(
            "App {} is configured with {}, not {}",
            app.app.name, app.scheme, wanted
        )));
    }
    Ok(())
}

fn require_owner_id(owner_id: &str) -> ApiResult<()> {
    if owner_id.trim().is_empty() {
        return Err(ApiError::missing_field("linked_account_owner_id"));
    }
    Ok(())
}

fn check_redirect(state: &AppState, url: &str) -> ApiResult<()> {
    if !state.redirect_origins.allows(url) {
        tracing::warn!(after_redirect_url = %url, "Rejected post-link redirect");
        return Err(ApiError::invalid_input(format!(
            "after_redirect_url origin is not allowed: {}",
            url
        )));
    }
    Ok(())
}

// ============================================================================
// OWNER ACTIONS
// ============================================================================

/// GET /v1/linked-accounts - List the project's accounts
pub async fn list_linked_accounts(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Query(query): Query<ListLinkedAccountsQuery>,
) -> ApiResult<Json<Vec<LinkedAccountResponse>>> {
    let accounts = state
        .orchestrator
        .credentials()
        .store()
        .list_linked_accounts(agent.project_id, query.app_name.as_deref())
        .await?;
    let accounts = accounts
        .into_iter()
        .filter(|a| {
            query
                .linked_account_owner_id
                .as_deref()
                .map_or(true, |owner| a.owner_id == owner)
        })
        .map(LinkedAccountResponse::from)
        .collect();
    Ok(Json(accounts))
}

/// GET /v1/linked-accounts/:id - Fetch one account
pub async fn get_linked_account(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    let account = owned_account(&state, agent.project_id, &raw_id).await?;
    Ok(Json(account.into()))
}

/// Load an account of the agent's own project. Other projects' accounts
/// read as not found.
async fn owned_account(
    state: &AppState,
    project_id: ProjectId,
    raw_id: &str,
) -> ApiResult<LinkedAccount> {
    let id: LinkedAccountId = raw_id
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid linked account id: {}", raw_id)))?;
    let account = state
        .orchestrator
        .credentials()
        .store()
        .get_by_id(id)
        .await?
        .filter(|a| a.project_id == project_id)
        .ok_or_else(|| ApiError::entity_not_found("LinkedAccount", id))?;
    Ok(account)
}

/// PATCH /v1/linked-accounts/:id - Enable or disable an account
pub async fn update_linked_account(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Path(raw_id): Path<String>,
    Json(req): Json<UpdateLinkedAccountRequest>,
) -> ApiResult<Json<LinkedAccountResponse>> {
    let id = owned_account(&state, agent.project_id, &raw_id).await?.id;
    let account = state
        .orchestrator
        .credentials()
        .set_enabled(id, req.enabled)
        .await?;
    Ok(Json(account.into()))
}

/// DELETE /v1/linked-accounts/:id - Remove an account and its credentials
pub async fn delete_linked_account(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    Path(raw_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = owned_account(&state, agent.project_id, &raw_id).await?.id;
    state.orchestrator.credentials().unlink(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
