//! Error types for Conduit operations
//!
//! Each failure domain has its own enum. [`ConduitError`] wraps them all and
//! maps every variant onto the closed [`ErrorKind`] taxonomy that callers see.
//! No variant ever carries credential material.

use crate::identity::{AgentId, LinkedAccountId, ProjectId, Timestamp};
use crate::params::ParameterGroup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Caller-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    AuthorizationError,
    QuotaExceeded,
    AuthenticationError,
    UpstreamError,
    ConnectorError,
    /// Storage or configuration failure outside the caller's control.
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Bad or missing parameters. Local, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Parameter not allowed: {group}.{field}")]
    UnknownParameter { group: ParameterGroup, field: String },

    #[error("Missing required parameter: {group}.{field}")]
    MissingRequiredParameter { group: ParameterGroup, field: String },

    #[error("Invalid type for {field}: expected {expected}")]
    InvalidType { field: String, expected: String },

    #[error("Invalid value for {field}: must be one of {allowed}")]
    InvalidEnum { field: String, allowed: String },

    #[error("Invalid format for {field}: expected {format}")]
    InvalidFormat { field: String, format: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Path template placeholder has no value: {placeholder}")]
    MissingPathParameter { placeholder: String },

    #[error("Invalid function input: {}", join_errors(.errors))]
    Multiple { errors: Vec<ValidationError> },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Collapse a list of per-field errors into one error.
    pub fn from_errors(mut errors: Vec<ValidationError>) -> Option<ValidationError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ValidationError::Multiple { errors }),
        }
    }

    /// Dotted field paths named by this error (flattened).
    pub fn fields(&self) -> Vec<String> {
        match self {
            ValidationError::UnknownParameter { group, field }
            | ValidationError::MissingRequiredParameter { group, field } => {
                vec![format!("{}.{}", group, field)]
            }
            ValidationError::InvalidType { field, .. }
            | ValidationError::InvalidEnum { field, .. }
            | ValidationError::InvalidFormat { field, .. } => vec![field.clone()],
            ValidationError::MissingPathParameter { placeholder } => {
                vec![format!("path.{}", placeholder)]
            }
            ValidationError::Multiple { errors } => {
                errors.iter().flat_map(ValidationError::fields).collect()
            }
            ValidationError::UnknownFunction { .. } | ValidationError::InvalidInput { .. } => {
                Vec::new()
            }
        }
    }
}

/// Access-control or policy denial. Surfaced, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Agent not found: {agent_id}")]
    UnknownAgent { agent_id: AgentId },

    #[error("Agent {agent_id} is not allowed to use app {app_name}")]
    AppNotAllowed { agent_id: AgentId, app_name: String },

    #[error("App is not active: {app_name}")]
    AppInactive { app_name: String },

    #[error("App {app_name} is not configured for project {project_id}")]
    AppNotConfigured { project_id: ProjectId, app_name: String },

    #[error("App {app_name} is disabled for project {project_id}")]
    AppConfigurationDisabled { project_id: ProjectId, app_name: String },

    #[error("Function is disabled for this project: {function_name}")]
    FunctionDisabled { function_name: String },

    #[error("Custom instruction violated for {function_name}: {reason}")]
    PolicyDenied { function_name: String, reason: String },

    #[error("Policy evaluator unavailable for {function_name}: {reason}")]
    PolicyUnavailable { function_name: String, reason: String },
}

/// Project budget exhausted for the current period.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Quota exceeded for project {project_id}: {used}/{limit} used, resets at {resets_at}")]
    Exceeded {
        project_id: ProjectId,
        used: u32,
        limit: u32,
        resets_at: Timestamp,
    },
}

/// Credential missing, invalid or unrecoverable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Linked account not found: {key}")]
    LinkedAccountNotFound { key: String },

    #[error("Linked account is disabled: {linked_account_id}")]
    LinkedAccountDisabled { linked_account_id: LinkedAccountId },

    #[error("App {app_name} does not support security scheme {scheme}")]
    SchemeNotSupported { app_name: String, scheme: String },

    #[error("No credentials available for linked account {linked_account_id}")]
    MissingCredentials { linked_account_id: LinkedAccountId },

    #[error("Access token expired and no refresh token is available for {linked_account_id}")]
    RefreshUnavailable { linked_account_id: LinkedAccountId },

    #[error("Token refresh failed for {linked_account_id}: {reason}")]
    RefreshFailed {
        linked_account_id: LinkedAccountId,
        reason: String,
    },

    #[error("Token refresh for {linked_account_id} timed out after {after_ms}ms")]
    RefreshTimeout {
        linked_account_id: LinkedAccountId,
        after_ms: u64,
    },

    #[error("Authorization code exchange failed: {reason}")]
    TokenExchangeFailed { reason: String },

    #[error("Invalid token response: {reason}")]
    InvalidTokenResponse { reason: String },

    #[error("Invalid OAuth2 state: {reason}")]
    InvalidState { reason: String },

    #[error("Upstream rejected the credential with status {status}")]
    Rejected { status: u16 },

    #[error("Credential store failure: {reason}")]
    CredentialStore { reason: String },
}

/// Non-auth failure from the remote API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    #[error("Upstream returned status {status}")]
    Status { status: u16, body: Value },

    #[error("Upstream request failed: {reason}")]
    Transport { reason: String },

    #[error("Upstream request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Invalid upstream request: {reason}")]
    InvalidRequest { reason: String },
}

/// Failure inside a custom connector handler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectorError {
    #[error("No connector registered under {handler}")]
    HandlerNotFound { handler: String },

    #[error("Connector {handler} failed: {reason}")]
    Failed { handler: String, reason: String },

    #[error("Connector {handler} upstream returned status {status}")]
    Status {
        handler: String,
        status: u16,
        body: Value,
    },

    #[error("Connector {handler} timed out after {after_ms}ms")]
    Timeout { handler: String, after_ms: u64 },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict on {entity}: {reason}")]
    Conflict { entity: String, reason: String },

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid catalog: {reason}")]
    InvalidCatalog { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Conduit errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConduitError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ConduitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConduitError::Validation(_) => ErrorKind::ValidationError,
            ConduitError::Authorization(_) => ErrorKind::AuthorizationError,
            ConduitError::Quota(_) => ErrorKind::QuotaExceeded,
            ConduitError::Authentication(_) => ErrorKind::AuthenticationError,
            ConduitError::Upstream(_) => ErrorKind::UpstreamError,
            ConduitError::Connector(_) => ErrorKind::ConnectorError,
            ConduitError::Storage(_) | ConduitError::Config(_) => ErrorKind::InternalError,
        }
    }

    /// Whether the failure was an outbound call exceeding its deadline.
    pub fn timed_out(&self) -> bool {
        matches!(
            self,
            ConduitError::Upstream(UpstreamError::Timeout { .. })
                | ConduitError::Authentication(AuthenticationError::RefreshTimeout { .. })
                | ConduitError::Connector(ConnectorError::Timeout { .. })
        )
    }

    /// Upstream status and body, passed through to callers for upstream failures only.
    pub fn upstream_detail(&self) -> Option<(u16, &Value)> {
        match self {
            ConduitError::Upstream(UpstreamError::Status { status, body })
            | ConduitError::Connector(ConnectorError::Status { status, body, .. }) => {
                Some((*status, body))
            }
            _ => None,
        }
    }
}

/// Result type alias for Conduit operations.
pub type ConduitResult<T> = Result<T, ConduitError>;

// =============================================================================
// TESTS
// =============================================================================
