//! Credential Manager
//!
//! Turns a LinkedAccount into a credential usable for one call. OAuth2
//! refresh is single-flight per account: the first caller that needs a new
//! token takes the account's lock and refreshes, later callers wait on the
//! same lock and then pick up the token it wrote back. A failed refresh is
//! recorded on the account's slot, so the waiters queued behind it fail with
//! the same error instead of calling the token endpoint again.

use super::oauth2::{OAuth2Client, PkcePair};
use super::state::{LinkRequest, StateCodec};
use super::{ResolvedCredentials, ResolvedSecret};
use conduit_core::{
    App, AuthenticationError, Clock, ConduitResult, LinkedAccount, LinkedAccountId,
    LinkedAccountKey, OAuth2Credentials, OAuth2Scheme, ProjectId, SecurityCredentials,
    SecurityScheme, SecuritySchemeKind,
};
use conduit_storage::CredentialStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    oauth2: OAuth2Client,
    state: StateCodec,
    clock: Arc<dyn Clock>,
    refresh_timeout: Duration,
    refresh_slots: DashMap<LinkedAccountId, Arc<RefreshSlot>>,
}

/// Per-account refresh coordination. Holding `failure`'s lock is holding
/// the account's refresh lock.
#[derive(Default)]
struct RefreshSlot {
    /// Completed token endpoint calls for the account.
    attempts: AtomicU64,
    failure: Mutex<Option<RefreshFailure>>,
}

/// Outcome of the last failed refresh of one access token.
struct RefreshFailure {
    stale_token: String,
    error: AuthenticationError,
    /// The provider refused the refresh token. The account stays invalid
    /// until it is re-linked; a timeout only fails the callers that were
    /// already waiting on it.
    rejected: bool,
}

impl RefreshFailure {
    fn applies_to(&self, token: &str, attempts_changed: bool) -> bool {
        self.stale_token == token && (self.rejected || attempts_changed)
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("state", &self.state)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_slots", &self.refresh_slots.len())
            .finish()
    }
}

fn oauth2_scheme<'a>(app: &'a App) -> Result<&'a OAuth2Scheme, AuthenticationError> {
    match app.scheme(SecuritySchemeKind::OAuth2) {
        Some(SecurityScheme::OAuth2(scheme)) => Ok(scheme),
        _ => Err(AuthenticationError::SchemeNotSupported {
            app_name: app.name.clone(),
            scheme: SecuritySchemeKind::OAuth2.to_string(),
        }),
    }
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        oauth2: OAuth2Client,
        state: StateCodec,
        clock: Arc<dyn Clock>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            store,
            oauth2,
            state,
            clock,
            refresh_timeout,
            refresh_slots: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // LOOKUP AND RESOLUTION
    // ========================================================================

    /// Fetch the account for a call. Missing and disabled accounts both
    /// require the owner to re-link.
    pub async fn linked_account(&self, key: &LinkedAccountKey) -> ConduitResult<LinkedAccount> {
        let account = self
            .store
            .get_linked_account(key)
            .await?
            .ok_or_else(|| AuthenticationError::LinkedAccountNotFound {
                key: key.to_string(),
            })?;
        if !account.enabled {
            return Err(AuthenticationError::LinkedAccountDisabled {
                linked_account_id: account.id,
            }
            .into());
        }
        Ok(account)
    }

    /// Produce a credential for one call, refreshing an expired OAuth2 token first.
    pub async fn resolve(
        &self,
        app: &App,
        account: &LinkedAccount,
    ) -> ConduitResult<ResolvedCredentials> {
        let scheme = app.scheme(account.security_scheme).ok_or_else(|| {
            AuthenticationError::SchemeNotSupported {
                app_name: app.name.clone(),
                scheme: account.security_scheme.to_string(),
            }
        })?;
        if matches!(scheme, SecurityScheme::NoAuth) {
            return Ok(ResolvedCredentials::new(
                account.id,
                scheme.clone(),
                ResolvedSecret::None,
            ));
        }

        // Own credentials first, then the App's defaults. Defaults are shared
        // across accounts and are never refreshed through one of them.
        let (credentials, owned) = match &account.credentials {
            Some(creds) => (creds, true),
            None => match app.default_credentials(account.security_scheme) {
                Some(creds) => (creds, false),
                None => {
                    return Err(AuthenticationError::MissingCredentials {
                        linked_account_id: account.id,
                    }
                    .into())
                }
            },
        };
        let missing = || AuthenticationError::MissingCredentials {
            linked_account_id: account.id,
        };

        let secret = match (scheme, credentials) {
            (SecurityScheme::ApiKey(_), SecurityCredentials::ApiKey(c)) => ResolvedSecret::ApiKey {
                secret_key: c.secret_key.clone(),
            },
            (SecurityScheme::HttpBasic(_), SecurityCredentials::HttpBasic(c)) => {
                ResolvedSecret::HttpBasic {
                    username: c.username.clone(),
                    password: c.password.clone(),
                }
            }
            (SecurityScheme::OAuth2(oauth), SecurityCredentials::OAuth2(c)) => {
                let refreshable = owned && c.can_refresh();
                let now = self.clock.now_epoch_secs();
                let token = if c.is_expired(now) {
                    if !refreshable {
                        return Err(AuthenticationError::RefreshUnavailable {
                            linked_account_id: account.id,
                        }
                        .into());
                    }
                    debug!(
                        linked_account_id = %account.id,
                        app_name = %app.name,
                        "Access token expired, refreshing"
                    );
                    self.refresh_single_flight(oauth, account.id, &c.access_token)
                        .await?
                        .access_token
                } else {
                    c.access_token.clone()
                };
                ResolvedSecret::Bearer {
                    access_token: token,
                    refreshable,
                }
            }
            _ => return Err(missing().into()),
        };

        Ok(ResolvedCredentials::new(account.id, scheme.clone(), secret))
    }

    /// Refresh after the upstream rejected `rejected`'s token.
    ///
    /// If another call already replaced the rejected token, that token is
    /// returned without a second refresh.
    pub async fn force_refresh(
        &self,
        rejected: &ResolvedCredentials,
    ) -> ConduitResult<ResolvedCredentials> {
        let (oauth, stale) = match (&rejected.scheme, &rejected.secret) {
            (
                SecurityScheme::OAuth2(oauth),
                ResolvedSecret::Bearer {
                    access_token,
                    refreshable: true,
                },
            ) => (oauth, access_token.as_str()),
            _ => {
                return Err(AuthenticationError::RefreshUnavailable {
                    linked_account_id: rejected.linked_account_id,
                }
                .into())
            }
        };
        let fresh = self
            .refresh_single_flight(oauth, rejected.linked_account_id, stale)
            .await?;
        Ok(ResolvedCredentials::new(
            rejected.linked_account_id,
            rejected.scheme.clone(),
            ResolvedSecret::Bearer {
                refreshable: fresh.can_refresh(),
                access_token: fresh.access_token,
            },
        ))
    }

    fn slot(&self, id: LinkedAccountId) -> Arc<RefreshSlot> {
        self.refresh_slots.entry(id).or_default().clone()
    }

    async fn refresh_single_flight(
        &self,
        scheme: &OAuth2Scheme,
        id: LinkedAccountId,
        stale_token: &str,
    ) -> ConduitResult<OAuth2Credentials> {
        let slot = self.slot(id);
        let seen = slot.attempts.load(Ordering::Acquire);
        let mut failure = slot.failure.lock().await;

        // Re-read under the lock: a caller ahead of us may have refreshed.
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| AuthenticationError::LinkedAccountNotFound { key: id.to_string() })?;
        let creds = match current.credentials {
            Some(SecurityCredentials::OAuth2(creds)) => creds,
            _ => {
                return Err(AuthenticationError::MissingCredentials {
                    linked_account_id: id,
                }
                .into())
            }
        };
        let now = self.clock.now_epoch_secs();
        if creds.access_token != stale_token && !creds.is_expired(now) {
            debug!(linked_account_id = %id, "Reusing token refreshed by a concurrent call");
            return Ok(creds);
        }

        // ... or may have failed to.
        let attempts_changed = slot.attempts.load(Ordering::Acquire) != seen;
        if let Some(previous) = failure.as_ref() {
            if previous.applies_to(&creds.access_token, attempts_changed) {
                debug!(linked_account_id = %id, "Reusing failed refresh outcome");
                return Err(previous.error.clone().into());
            }
        }

        let refresh_token = creds
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(AuthenticationError::RefreshUnavailable {
                linked_account_id: id,
            })?;

        let outcome = tokio::time::timeout(
            self.refresh_timeout,
            self.oauth2.refresh(scheme, &refresh_token, now),
        )
        .await;
        slot.attempts.fetch_add(1, Ordering::AcqRel);

        let (error, rejected) = match outcome {
            Ok(Ok(refreshed)) => {
                self.store
                    .update_credentials(
                        id,
                        SecurityCredentials::OAuth2(refreshed.clone()),
                        self.clock.now(),
                    )
                    .await?;
                *failure = None;
                info!(linked_account_id = %id, expires_at = ?refreshed.expires_at, "Access token refreshed");
                return Ok(refreshed);
            }
            Ok(Err(e)) => {
                warn!(linked_account_id = %id, error = %e, "Token refresh failed");
                let error = AuthenticationError::RefreshFailed {
                    linked_account_id: id,
                    reason: e.to_string(),
                };
                (error, true)
            }
            Err(_) => {
                warn!(linked_account_id = %id, "Token refresh timed out");
                let error = AuthenticationError::RefreshTimeout {
                    linked_account_id: id,
                    after_ms: self.refresh_timeout.as_millis() as u64,
                };
                (error, false)
            }
        };
        *failure = Some(RefreshFailure {
            stale_token: creds.access_token,
            error: error.clone(),
            rejected,
        });
        Err(error.into())
    }

    /// Record a use of the account after dispatch.
    pub async fn touch(&self, id: LinkedAccountId) -> ConduitResult<()> {
        self.store.touch(id, self.clock.now()).await
    }

    // ========================================================================
    // LINKING
    // ========================================================================

    /// Link an account whose credentials are known up front: no_auth,
    /// api_key, http_basic, or `None` to use the App's defaults.
    pub async fn link_account(
        &self,
        app: &App,
        key: LinkedAccountKey,
        scheme: SecuritySchemeKind,
        credentials: Option<SecurityCredentials>,
    ) -> ConduitResult<LinkedAccount> {
        if !app.supports(scheme) {
            return Err(AuthenticationError::SchemeNotSupported {
                app_name: app.name.clone(),
                scheme: scheme.to_string(),
            }
            .into());
        }
        if let Some(creds) = &credentials {
            if creds.kind() != scheme {
                return Err(AuthenticationError::SchemeNotSupported {
                    app_name: app.name.clone(),
                    scheme: creds.kind().to_string(),
                }
                .into());
            }
        }
        self.upsert(key, scheme, credentials).await
    }

    /// Start an OAuth2 link flow and return the provider authorize URL.
    pub async fn begin_link(
        &self,
        app: &App,
        project_id: ProjectId,
        linked_account_owner_id: &str,
        redirect_uri: &str,
        after_redirect_url: Option<String>,
    ) -> ConduitResult<String> {
        let scheme = oauth2_scheme(app)?;
        let pkce = PkcePair::generate();
        let state = self.state.issue(LinkRequest {
            project_id,
            app_name: app.name.clone(),
            linked_account_owner_id: linked_account_owner_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code_verifier: pkce.verifier.clone(),
            after_redirect_url,
        })?;
        let url = OAuth2Client::authorization_url(scheme, redirect_uri, &state, &pkce.challenge)?;
        info!(
            project_id = %project_id,
            app_name = %app.name,
            "Issued OAuth2 authorization URL"
        );
        Ok(url)
    }

    pub fn verify_state(&self, state: &str) -> ConduitResult<LinkRequest> {
        Ok(self.state.verify(state)?)
    }

    /// Exchange the callback code and create or update the LinkedAccount.
    pub async fn complete_link(
        &self,
        app: &App,
        link: &LinkRequest,
        code: &str,
    ) -> ConduitResult<LinkedAccount> {
        if app.name != link.app_name {
            return Err(AuthenticationError::InvalidState {
                reason: format!("state was issued for {}", link.app_name),
            }
            .into());
        }
        let scheme = oauth2_scheme(app)?;
        let now = self.clock.now_epoch_secs();
        let creds = tokio::time::timeout(
            self.refresh_timeout,
            self.oauth2
                .exchange_code(scheme, code, &link.redirect_uri, &link.code_verifier, now),
        )
        .await
        .map_err(|_| AuthenticationError::TokenExchangeFailed {
            reason: format!(
                "token endpoint timed out after {}ms",
                self.refresh_timeout.as_millis()
            ),
        })??;

        let key = LinkedAccountKey::new(
            link.project_id,
            link.app_name.clone(),
            link.linked_account_owner_id.clone(),
        );
        self.upsert(
            key,
            SecuritySchemeKind::OAuth2,
            Some(SecurityCredentials::OAuth2(creds)),
        )
        .await
    }

    /// Create the account for `key` or overwrite the existing one, enabled.
    /// The returned record never carries credential material.
    async fn upsert(
        &self,
        key: LinkedAccountKey,
        scheme: SecuritySchemeKind,
        credentials: Option<SecurityCredentials>,
    ) -> ConduitResult<LinkedAccount> {
        // An existing account is rewritten under its refresh lock, so an
        // in-flight refresh cannot overwrite the new credentials.
        let slot = self
            .store
            .get_linked_account(&key)
            .await?
            .map(|existing| self.slot(existing.id));
        let mut failure = match &slot {
            Some(slot) => Some(slot.failure.lock().await),
            None => None,
        };

        let account = self
            .store
            .upsert_linked_account(key, scheme, credentials, self.clock.now())
            .await?;
        if let Some(failure) = failure.as_mut() {
            **failure = None;
        }
        info!(
            linked_account_id = %account.id,
            project_id = %account.project_id,
            app_name = %account.app_name,
            scheme = %scheme,
            "Linked account saved"
        );
        Ok(account)
    }

    // ========================================================================
    // OWNER ACTIONS
    // ========================================================================

    pub async fn set_enabled(&self, id: LinkedAccountId, enabled: bool) -> ConduitResult<LinkedAccount> {
        let account = self.store.set_enabled(id, enabled, self.clock.now()).await?;
        info!(linked_account_id = %id, enabled, "Linked account updated");
        Ok(account)
    }

    pub async fn unlink(&self, id: LinkedAccountId) -> ConduitResult<bool> {
        let removed = self.store.delete_linked_account(id).await?;
        self.refresh_slots.remove(&id);
        if removed {
            info!(linked_account_id = %id, "Linked account deleted");
        }
        Ok(removed)
    }
}
