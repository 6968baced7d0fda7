//! OAuth2 authorization-code client with PKCE
//!
//! Provider quirks are data on the [`OAuth2Scheme`]: where the scope goes on
//! the authorize URL, extra authorize parameters, how the client
//! authenticates at the token endpoint and where the token object sits in
//! the response.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use conduit_core::{AuthenticationError, OAuth2Credentials, OAuth2Scheme, TokenEndpointAuthMethod};
use rand::{distr::Alphanumeric, Rng};
use reqwest::{header::ACCEPT, Client, Url};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a generated PKCE code verifier.
const CODE_VERIFIER_LEN: usize = 64;

/// PKCE verifier and its S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_VERIFIER_LEN)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Token endpoint client shared by code exchange and refresh.
#[derive(Debug, Clone, Default)]
pub struct OAuth2Client {
    http: Client,
}

impl OAuth2Client {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Build the provider authorize URL for a link flow.
    pub fn authorization_url(
        scheme: &OAuth2Scheme,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, AuthenticationError> {
        let mut url =
            Url::parse(&scheme.authorize_url).map_err(|e| AuthenticationError::TokenExchangeFailed {
                reason: format!("invalid authorize_url: {}", e),
            })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &scheme.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("state", state)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256");
            if !scheme.scope.is_empty() {
                query.append_pair(&scheme.scope_param, &scheme.scope);
            }
            for (key, value) in &scheme.extra_authorize_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        scheme: &OAuth2Scheme,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        now: i64,
    ) -> Result<OAuth2Credentials, AuthenticationError> {
        let raw = self
            .token_request(
                scheme,
                &scheme.access_token_url,
                vec![
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code.to_string()),
                    ("redirect_uri", redirect_uri.to_string()),
                    ("code_verifier", code_verifier.to_string()),
                ],
            )
            .await?;
        parse_token_response(scheme, raw, now)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// When the provider does not rotate the refresh token, the old one is kept.
    pub async fn refresh(
        &self,
        scheme: &OAuth2Scheme,
        refresh_token: &str,
        now: i64,
    ) -> Result<OAuth2Credentials, AuthenticationError> {
        let raw = self
            .token_request(
                scheme,
                &scheme.refresh_token_url,
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", refresh_token.to_string()),
                ],
            )
            .await?;
        let mut creds = parse_token_response(scheme, raw, now)?;
        if creds.refresh_token.is_none() {
            creds.refresh_token = Some(refresh_token.to_string());
        }
        Ok(creds)
    }

    async fn token_request(
        &self,
        scheme: &OAuth2Scheme,
        url: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<Value, AuthenticationError> {
        let mut request = self.http.post(url).header(ACCEPT, "application/json");
        match scheme.token_endpoint_auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => {
                request = request.basic_auth(&scheme.client_id, Some(&scheme.client_secret));
            }
            TokenEndpointAuthMethod::ClientSecretPost => {
                form.push(("client_id", scheme.client_id.clone()));
                form.push(("client_secret", scheme.client_secret.clone()));
            }
            TokenEndpointAuthMethod::None => {
                form.push(("client_id", scheme.client_id.clone()));
            }
        }

        let response = request.form(&form).send().await.map_err(|e| {
            AuthenticationError::TokenExchangeFailed {
                reason: format!("token request failed: {}", e),
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthenticationError::TokenExchangeFailed {
                reason: format!("failed to read token response: {}", e),
            })?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            return Err(AuthenticationError::TokenExchangeFailed {
                reason: format!(
                    "token endpoint returned {}{}",
                    status.as_u16(),
                    oauth_error_suffix(body.as_ref())
                ),
            });
        }
        let body = body.ok_or_else(|| AuthenticationError::InvalidTokenResponse {
            reason: "token response is not JSON".to_string(),
        })?;
        // Some providers answer 200 with {"ok": false, "error": ...}.
        if body.get("ok") == Some(&Value::Bool(false)) {
            return Err(AuthenticationError::TokenExchangeFailed {
                reason: format!("token endpoint rejected the request{}", oauth_error_suffix(Some(&body))),
            });
        }
        Ok(body)
    }
}

fn oauth_error_suffix(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("error"))
        .and_then(Value::as_str)
        .map(|e| format!(": {}", e))
        .unwrap_or_default()
}

/// Turn a token endpoint response into stored credentials.
///
/// Fails when no `access_token` is present at the configured location.
pub fn parse_token_response(
    scheme: &OAuth2Scheme,
    raw: Value,
    now: i64,
) -> Result<OAuth2Credentials, AuthenticationError> {
    let token = match scheme.token_response_path.as_deref() {
        Some(path) if !path.is_empty() => path
            .split('.')
            .try_fold(&raw, |value, segment| value.get(segment))
            .ok_or_else(|| AuthenticationError::InvalidTokenResponse {
                reason: format!("no token object at {}", path),
            })?,
        _ => &raw,
    };

    let access_token = token
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthenticationError::InvalidTokenResponse {
            reason: "missing access_token".to_string(),
        })?
        .to_string();
    let string_field = |name: &str| {
        token
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let expires_in = token.get("expires_in").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<i64>().ok()))
    });

    Ok(OAuth2Credentials {
        access_token,
        token_type: string_field("token_type"),
        expires_at: expires_in.map(|secs| now.saturating_add(secs)),
        refresh_token: string_field("refresh_token"),
        raw_token_response: raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn scheme(token_url: &str) -> OAuth2Scheme {
        OAuth2Scheme {
            location: conduit_core::CredentialLocation::Header,
            name: "Authorization".into(),
            prefix: Some("Bearer".into()),
            client_id: "client-1".into(),
            client_secret: "shh".into(),
            scope: "repo user".into(),
            authorize_url: "https://auth.example.com/authorize?prompt=consent".into(),
            access_token_url: token_url.into(),
            refresh_token_url: token_url.into(),
            token_endpoint_auth_method: TokenEndpointAuthMethod::ClientSecretPost,
            scope_param: "scope".into(),
            token_response_path: None,
            extra_authorize_params: BTreeMap::from([("access_type".to_string(), "offline".to_string())]),
        }
    }

    #[test]
    fn test_pkce_challenge_is_s256() {
        // RFC 7636 appendix B
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(PkcePair::generate().verifier.len(), CODE_VERIFIER_LEN);
    }

    #[test]
    fn test_authorization_url_params() {
        let scheme = scheme("https://auth.example.com/token");
        let raw = OAuth2Client::authorization_url(&scheme, "https://conduit.test/cb", "st", "ch").unwrap();
        let url = Url::parse(&raw).unwrap();
        let params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["scope"], "repo user");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["redirect_uri"], "https://conduit.test/cb");
    }

    #[test]
    fn test_custom_scope_param() {
        let mut scheme = scheme("https://auth.example.com/token");
        scheme.scope_param = "user_scope".into();
        let raw = OAuth2Client::authorization_url(&scheme, "https://x/cb", "st", "ch").unwrap();
        assert!(raw.contains("user_scope=repo+user"));
        assert!(!raw.contains("&scope="));
    }

    #[test]
    fn test_parse_token_response_computes_expiry() {
        let scheme = scheme("https://auth.example.com/token");
        let creds = parse_token_response(
            &scheme,
            json!({"access_token": "a", "refresh_token": "r", "expires_in": 3600, "token_type": "Bearer"}),
            1_000,
        )
        .unwrap();
        assert_eq!(creds.expires_at, Some(4_600));
        assert_eq!(creds.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_parse_nested_token_object() {
        let mut scheme = scheme("https://auth.example.com/token");
        scheme.token_response_path = Some("authed_user".into());
        let creds = parse_token_response(
            &scheme,
            json!({"ok": true, "access_token": "bot", "authed_user": {"access_token": "user-token"}}),
            0,
        )
        .unwrap();
        assert_eq!(creds.access_token, "user-token");
        assert_eq!(creds.expires_at, None);
    }

    #[test]
    fn test_missing_access_token_rejected() {
        let scheme = scheme("https://auth.example.com/token");
        let err = parse_token_response(&scheme, json!({"refresh_token": "r"}), 0).unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidTokenResponse { .. }));
    }
}
