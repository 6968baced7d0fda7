//! Signed OAuth2 `state` parameter
//!
//! The link flow is stateless on our side: everything the callback needs
//! (who is linking what, the PKCE verifier, where to send the browser after)
//! travels inside an HS256 JWT. Signature checking is left to
//! `jsonwebtoken`; expiry is checked against the injected clock.

use conduit_core::{AuthenticationError, Clock, ConfigError, ProjectId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HMAC secret for state tokens.
#[derive(Clone)]
pub struct StateSecret(SecretString);

impl StateSecret {
    pub fn new(secret: String) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "oauth2_state_secret".to_string(),
            });
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for StateSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateSecret([REDACTED, {} chars])", self.len())
    }
}

/// A pending account link, as carried through the provider redirect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub project_id: ProjectId,
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub redirect_uri: String,
    pub code_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_redirect_url: Option<String>,
}

impl std::fmt::Debug for LinkRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRequest")
            .field("project_id", &self.project_id)
            .field("app_name", &self.app_name)
            .field("linked_account_owner_id", &self.linked_account_owner_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("code_verifier", &"[REDACTED]")
            .field("after_redirect_url", &self.after_redirect_url)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct StateClaims {
    #[serde(flatten)]
    link: LinkRequest,
    iat: i64,
    exp: i64,
}

/// Issues and verifies state tokens.
pub struct StateCodec {
    secret: StateSecret,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("secret", &self.secret)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

fn invalid_state(reason: impl Into<String>) -> AuthenticationError {
    AuthenticationError::InvalidState {
        reason: reason.into(),
    }
}

impl StateCodec {
    pub fn new(secret: StateSecret, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            ttl_secs,
            clock,
        }
    }

    pub fn issue(&self, link: LinkRequest) -> Result<String, AuthenticationError> {
        let now = self.clock.now_epoch_secs();
        let claims = StateClaims {
            link,
            iat: now,
            exp: now + self.ttl_secs,
        };
        let key = EncodingKey::from_secret(self.secret.expose().as_bytes());
        encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| invalid_state(format!("failed to sign state: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<LinkRequest, AuthenticationError> {
        let key = DecodingKey::from_secret(self.secret.expose().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

        let data = decode::<StateClaims>(token, &key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => invalid_state("signature is invalid"),
            _ => invalid_state("state is malformed"),
        })?;

        if data.claims.exp < self.clock.now_epoch_secs() {
            return Err(invalid_state("state has expired"));
        }
        Ok(data.claims.link)
    }
}
