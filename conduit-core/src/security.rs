//! Security schemes and credential material
//!
//! Schemes are static App configuration (where to put the credential, which
//! OAuth2 endpoints to use). Credentials are the per-account secret material
//! and never leave the engine: their `Debug` output is redacted.

use crate::params::ParameterGroup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of authentication schemes an App may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecuritySchemeKind {
    #[serde(rename = "no_auth")]
    NoAuth,
    #[serde(rename = "api_key")]
    ApiKey,
    #[serde(rename = "http_basic")]
    HttpBasic,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl SecuritySchemeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecuritySchemeKind::NoAuth => "no_auth",
            SecuritySchemeKind::ApiKey => "api_key",
            SecuritySchemeKind::HttpBasic => "http_basic",
            SecuritySchemeKind::OAuth2 => "oauth2",
        }
    }
}

impl fmt::Display for SecuritySchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement of an injected credential on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialLocation {
    Header,
    Query,
    Body,
    Cookie,
}

impl CredentialLocation {
    /// Parameter group the injected value lands in.
    pub fn group(&self) -> ParameterGroup {
        match self {
            CredentialLocation::Header => ParameterGroup::Header,
            CredentialLocation::Query => ParameterGroup::Query,
            CredentialLocation::Body => ParameterGroup::Body,
            CredentialLocation::Cookie => ParameterGroup::Cookie,
        }
    }
}

fn default_header_location() -> CredentialLocation {
    CredentialLocation::Header
}

fn default_authorization_name() -> String {
    "Authorization".to_string()
}

fn default_basic_prefix() -> Option<String> {
    Some("Basic".to_string())
}

fn default_bearer_prefix() -> Option<String> {
    Some("Bearer".to_string())
}

fn default_scope_param() -> String {
    "scope".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyScheme {
    pub location: CredentialLocation,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBasicScheme {
    #[serde(default = "default_header_location")]
    pub location: CredentialLocation,
    #[serde(default = "default_authorization_name")]
    pub name: String,
    #[serde(default = "default_basic_prefix")]
    pub prefix: Option<String>,
}

impl Default for HttpBasicScheme {
    fn default() -> Self {
        Self {
            location: default_header_location(),
            name: default_authorization_name(),
            prefix: default_basic_prefix(),
        }
    }
}

/// How the client authenticates itself at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    #[default]
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

/// OAuth2 authorization-code configuration of an App.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Scheme {
    #[serde(default = "default_header_location")]
    pub location: CredentialLocation,
    #[serde(default = "default_authorization_name")]
    pub name: String,
    #[serde(default = "default_bearer_prefix")]
    pub prefix: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
    pub authorize_url: String,
    pub access_token_url: String,
    pub refresh_token_url: String,
    #[serde(default)]
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    /// Query parameter carrying the scope on the authorize URL.
    #[serde(default = "default_scope_param")]
    pub scope_param: String,
    /// Dotted path to the token object inside the token response, for
    /// providers that nest it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_response_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_authorize_params: BTreeMap<String, String>,
}

impl fmt::Debug for OAuth2Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Scheme")
            .field("location", &self.location)
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("authorize_url", &self.authorize_url)
            .field("access_token_url", &self.access_token_url)
            .field("refresh_token_url", &self.refresh_token_url)
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .finish()
    }
}

/// Static per-App configuration of one supported scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityScheme {
    #[serde(rename = "no_auth")]
    NoAuth,
    #[serde(rename = "api_key")]
    ApiKey(ApiKeyScheme),
    #[serde(rename = "http_basic")]
    HttpBasic(HttpBasicScheme),
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Scheme),
}

impl SecurityScheme {
    pub fn kind(&self) -> SecuritySchemeKind {
        match self {
            SecurityScheme::NoAuth => SecuritySchemeKind::NoAuth,
            SecurityScheme::ApiKey(_) => SecuritySchemeKind::ApiKey,
            SecurityScheme::HttpBasic(_) => SecuritySchemeKind::HttpBasic,
            SecurityScheme::OAuth2(_) => SecuritySchemeKind::OAuth2,
        }
    }

    /// Where the engine injects this scheme's credential, if anywhere.
    pub fn injection_target(&self) -> Option<(CredentialLocation, &str)> {
        match self {
            SecurityScheme::NoAuth => None,
            SecurityScheme::ApiKey(s) => Some((s.location, s.name.as_str())),
            SecurityScheme::HttpBasic(s) => Some((s.location, s.name.as_str())),
            SecurityScheme::OAuth2(s) => Some((s.location, s.name.as_str())),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            SecurityScheme::NoAuth => None,
            SecurityScheme::ApiKey(s) => s.prefix.as_deref(),
            SecurityScheme::HttpBasic(s) => s.prefix.as_deref(),
            SecurityScheme::OAuth2(s) => s.prefix.as_deref(),
        }
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    pub secret_key: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBasicCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Unix epoch seconds; `None` means the token never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub raw_token_response: Value,
}

impl OAuth2Credentials {
    /// Whether the access token is no longer usable at `now` (epoch secs).
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Scheme-shaped secret material of a LinkedAccount.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecurityCredentials {
    #[serde(rename = "no_auth")]
    NoAuth,
    #[serde(rename = "api_key")]
    ApiKey(ApiKeyCredentials),
    #[serde(rename = "http_basic")]
    HttpBasic(HttpBasicCredentials),
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credentials),
}

impl SecurityCredentials {
    pub fn kind(&self) -> SecuritySchemeKind {
        match self {
            SecurityCredentials::NoAuth => SecuritySchemeKind::NoAuth,
            SecurityCredentials::ApiKey(_) => SecuritySchemeKind::ApiKey,
            SecurityCredentials::HttpBasic(_) => SecuritySchemeKind::HttpBasic,
            SecurityCredentials::OAuth2(_) => SecuritySchemeKind::OAuth2,
        }
    }
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeyCredentials([REDACTED, {} chars])", self.secret_key.len())
    }
}

impl fmt::Debug for HttpBasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBasicCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for OAuth2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Credentials")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl fmt::Debug for SecurityCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityCredentials::NoAuth => f.write_str("NoAuth"),
            SecurityCredentials::ApiKey(c) => fmt::Debug::fmt(c, f),
            SecurityCredentials::HttpBasic(c) => fmt::Debug::fmt(c, f),
            SecurityCredentials::OAuth2(c) => fmt::Debug::fmt(c, f),
        }
    }
}
