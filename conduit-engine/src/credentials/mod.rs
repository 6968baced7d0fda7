//! Credential Manager and OAuth2 support
//!
//! Callers of the engine never see credential material. The dispatcher only
//! receives a [`ResolvedCredentials`] value, which knows where the secret goes
//! on the outbound request and nothing else.

mod manager;
mod oauth2;
mod state;

pub use manager::CredentialManager;
pub use oauth2::{parse_token_response, OAuth2Client, PkcePair};
pub use state::{LinkRequest, StateCodec, StateSecret};

use crate::resolver::InjectedField;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use conduit_core::{CredentialLocation, LinkedAccountId, SecurityScheme};
use std::fmt;

/// Secret material ready for one call.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedSecret {
    None,
    ApiKey { secret_key: String },
    HttpBasic { username: String, password: String },
    Bearer { access_token: String, refreshable: bool },
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedSecret::None => f.write_str("None"),
            ResolvedSecret::ApiKey { .. } => f.write_str("ApiKey([REDACTED])"),
            ResolvedSecret::HttpBasic { username, .. } => f
                .debug_struct("HttpBasic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            ResolvedSecret::Bearer { refreshable, .. } => f
                .debug_struct("Bearer")
                .field("access_token", &"[REDACTED]")
                .field("refreshable", refreshable)
                .finish(),
        }
    }
}

/// Where and what to put on the outbound request.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialInjection {
    pub location: CredentialLocation,
    pub name: String,
    pub value: String,
}

impl fmt::Debug for CredentialInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInjection")
            .field("location", &self.location)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// A live credential for one linked account, bound to its App scheme.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub linked_account_id: LinkedAccountId,
    pub scheme: SecurityScheme,
    pub secret: ResolvedSecret,
}

impl ResolvedCredentials {
    pub fn new(
        linked_account_id: LinkedAccountId,
        scheme: SecurityScheme,
        secret: ResolvedSecret,
    ) -> Self {
        Self {
            linked_account_id,
            scheme,
            secret,
        }
    }

    /// The parameter the injected credential satisfies, if any.
    pub fn injected_field(&self) -> Option<InjectedField<'_>> {
        if matches!(self.secret, ResolvedSecret::None) {
            return None;
        }
        self.scheme
            .injection_target()
            .map(|(location, name)| InjectedField::new(location.group(), name))
    }

    /// Rendered credential value and its placement.
    pub fn injection(&self) -> Option<CredentialInjection> {
        let (location, name) = self.scheme.injection_target()?;
        let prefix = self.scheme.prefix();
        let value = match &self.secret {
            ResolvedSecret::None => return None,
            ResolvedSecret::ApiKey { secret_key } => with_prefix(prefix, secret_key),
            ResolvedSecret::HttpBasic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password));
                with_prefix(prefix, &encoded)
            }
            ResolvedSecret::Bearer { access_token, .. } => with_prefix(prefix, access_token),
        };
        Some(CredentialInjection {
            location,
            name: name.to_string(),
            value,
        })
    }

    /// Whether a rejected call may be retried after a forced refresh.
    pub fn is_refreshable(&self) -> bool {
        matches!(
            self.secret,
            ResolvedSecret::Bearer {
                refreshable: true,
                ..
            }
        )
    }

    pub fn access_token(&self) -> Option<&str> {
        match &self.secret {
            ResolvedSecret::Bearer { access_token, .. } => Some(access_token),
            _ => None,
        }
    }
}

fn with_prefix(prefix: Option<&str>, value: &str) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{} {}", prefix, value),
        None => value.to_string(),
    }
}
