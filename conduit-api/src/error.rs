//! Error Types for Conduit API
//!
//! - `ErrorCode` categorizes failures and maps each to an HTTP status
//! - `ApiError` is the JSON error body every route returns
//!
//! Engine errors convert through their `ErrorKind`, so the HTTP surface and
//! `ExecutionResult` agree on categories.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conduit_core::{ConduitError, ConfigError, ErrorKind, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Caller errors (400, 401, 403, 404)
    // ========================================================================
    /// Missing or unknown X-API-KEY
    Unauthorized,

    /// Access-control or custom-instruction denial
    Forbidden,

    /// Parameters do not satisfy the function's contract
    ValidationFailed,

    /// Malformed request outside the parameter contract
    InvalidInput,

    /// Requested entity does not exist
    EntityNotFound,

    /// Linked account missing, disabled or its credential unrecoverable
    AuthenticationFailed,

    /// The provider refused the OAuth2 authorization
    #[serde(rename = "OAUTH2_DENIED")]
    OAuth2Denied,

    // ========================================================================
    // Budget (429)
    // ========================================================================
    QuotaExceeded,

    // ========================================================================
    // Downstream (502, 504)
    // ========================================================================
    UpstreamFailed,
    ConnectorFailed,
    Timeout,

    // ========================================================================
    // Server errors (500)
    // ========================================================================
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::AuthenticationFailed
            | ErrorCode::OAuth2Denied => StatusCode::BAD_REQUEST,
            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::UpstreamFailed | ErrorCode::ConnectorFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::AuthenticationFailed => "Linked account credentials unavailable",
            ErrorCode::OAuth2Denied => "OAuth2 authorization was denied",
            ErrorCode::QuotaExceeded => "Project quota exceeded",
            ErrorCode::UpstreamFailed => "Upstream request failed",
            ErrorCode::ConnectorFailed => "Connector failed",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::InternalError => "Internal server error",
        }
    }

    /// Code for an engine error category.
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ValidationError => ErrorCode::ValidationFailed,
            ErrorKind::AuthorizationError => ErrorCode::Forbidden,
            ErrorKind::QuotaExceeded => ErrorCode::QuotaExceeded,
            ErrorKind::AuthenticationError => ErrorCode::AuthenticationFailed,
            ErrorKind::UpstreamError => ErrorCode::UpstreamFailed,
            ErrorKind::ConnectorError => ErrorCode::ConnectorFailed,
            ErrorKind::InternalError => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ConduitError> for ApiError {
    fn from(err: ConduitError) -> Self {
        match &err {
            // Storage and config details stay in the logs.
            ConduitError::Storage(StorageError::NotFound { entity, id }) => {
                ApiError::entity_not_found(entity, id)
            }
            ConduitError::Storage(_) | ConduitError::Config(_) => {
                tracing::error!(error = %err, "Internal error");
                ApiError::from_code(ErrorCode::InternalError)
            }
            _ if err.timed_out() => ApiError::new(ErrorCode::Timeout, err.to_string()),
            _ => {
                let api = ApiError::new(ErrorCode::from_kind(err.kind()), err.to_string());
                match err.upstream_detail() {
                    Some((status, body)) => api.with_details(serde_json::json!({
                        "upstream_status": status,
                        "upstream_body": body,
                    })),
                    None => api,
                }
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Configuration error: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}
