//! Protocol Dispatcher
//!
//! One closed match over [`Protocol`] picks the strategy. Both strategies
//! return a [`DispatchOutcome`] or a [`ConduitError`], so the orchestrator
//! never looks at which one ran.

mod connector;
mod rest;

pub use connector::{ConnectorContext, ConnectorHandler, ConnectorRegistry};
pub use rest::RestDispatcher;
pub(crate) use rest::render_url;

use crate::credentials::ResolvedCredentials;
use conduit_core::{
    App, AssembledArguments, AuthenticationError, ConduitError, ConduitResult, ConnectorError,
    CredentialLocation, Function, Protocol, UpstreamError,
};
use reqwest::header::{HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Normalized result of one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub data: Value,
    /// Upstream HTTP status, when there was exactly one HTTP exchange.
    pub status: Option<u16>,
    /// Units to charge against the Project quota.
    pub units: u32,
}

impl DispatchOutcome {
    pub fn new(data: Value, status: Option<u16>) -> Self {
        Self {
            data,
            status,
            units: 1,
        }
    }

    pub fn with_units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }
}

pub struct Dispatcher {
    rest: RestDispatcher,
    connectors: ConnectorRegistry,
    http: Client,
    timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connectors", &self.connectors)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(http: Client, connectors: ConnectorRegistry, timeout: Duration) -> Self {
        Self {
            rest: RestDispatcher::new(http.clone()),
            connectors,
            http,
            timeout,
        }
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub async fn dispatch(
        &self,
        app: &App,
        function: &Function,
        arguments: &AssembledArguments,
        credentials: &ResolvedCredentials,
    ) -> ConduitResult<DispatchOutcome> {
        debug!(function_name = %function.name, app_name = %app.name, "Dispatching");
        let result = match &function.protocol {
            Protocol::Rest(protocol) => {
                self.rest
                    .call(protocol, arguments, credentials, self.timeout)
                    .await
            }
            Protocol::Connector(protocol) => {
                let ctx = ConnectorContext {
                    app,
                    function,
                    protocol,
                    arguments,
                    credentials,
                    http: &self.http,
                };
                self.connectors.invoke(ctx, self.timeout).await
            }
        };
        result.map_err(|e| remap_unauthorized(app, e))
    }
}

/// 401/403 become a credential rejection for Apps that opted into
/// refresh-and-retry; everything else passes through unchanged.
fn remap_unauthorized(app: &App, err: ConduitError) -> ConduitError {
    let status = match &err {
        ConduitError::Upstream(UpstreamError::Status { status, .. })
        | ConduitError::Connector(ConnectorError::Status { status, .. }) => *status,
        _ => return err,
    };
    if app.unauthorized_retry && matches!(status, 401 | 403) {
        AuthenticationError::Rejected { status }.into()
    } else {
        err
    }
}

/// Parse a response body: JSON when it parses, else the text, `null` when empty.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Render a scalar for a query string, path segment or header.
pub(crate) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Attach a header- or query-placed credential to a request built by a
/// connector. Body placement is the connector's own business.
pub(crate) fn authorize(
    request: RequestBuilder,
    credentials: &ResolvedCredentials,
) -> Result<RequestBuilder, String> {
    let Some(injection) = credentials.injection() else {
        return Ok(request);
    };
    match injection.location {
        CredentialLocation::Header => {
            let name = HeaderName::from_bytes(injection.name.as_bytes())
                .map_err(|e| format!("invalid credential header name: {}", e))?;
            let value = HeaderValue::from_str(&injection.value)
                .map_err(|_| "credential is not a valid header value".to_string())?;
            Ok(request.header(name, value))
        }
        CredentialLocation::Query => Ok(request.query(&[(injection.name, injection.value)])),
        CredentialLocation::Cookie => {
            let value = HeaderValue::from_str(&format!("{}={}", injection.name, injection.value))
                .map_err(|_| "credential is not a valid cookie value".to_string())?;
            Ok(request.header(COOKIE, value))
        }
        CredentialLocation::Body => Err("body-placed credentials are not supported here".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app(unauthorized_retry: bool) -> App {
        App {
            name: "GITHUB".into(),
            description: String::new(),
            categories: Vec::new(),
            security_schemes: Vec::new(),
            default_credentials: Vec::new(),
            active: true,
            unauthorized_retry,
        }
    }

    #[test]
    fn test_unauthorized_remapped_only_when_enabled() {
        let err: ConduitError = UpstreamError::Status {
            status: 401,
            body: json!({}),
        }
        .into();
        assert_eq!(
            remap_unauthorized(&app(true), err.clone()),
            ConduitError::Authentication(AuthenticationError::Rejected { status: 401 })
        );
        assert_eq!(remap_unauthorized(&app(false), err.clone()), err);

        let not_found: ConduitError = UpstreamError::Status {
            status: 404,
            body: json!({}),
        }
        .into();
        assert_eq!(remap_unauthorized(&app(true), not_found.clone()), not_found);
    }

    #[test]
    fn test_connector_forbidden_remapped() {
        let err: ConduitError = ConnectorError::Status {
            handler: "mail.send".into(),
            status: 403,
            body: Value::Null,
        }
        .into();
        assert!(matches!(
            remap_unauthorized(&app(true), err),
            ConduitError::Authentication(AuthenticationError::Rejected { status: 403 })
        ));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body("plain text"), json!("plain text"));
        assert_eq!(parse_body("  "), Value::Null);
    }
}
