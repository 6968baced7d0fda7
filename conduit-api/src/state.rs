//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use conduit_core::{Clock, SystemClock};
use conduit_engine::{
    builtin_registry, AccessControlEvaluator, CredentialManager, Dispatcher,
    ExecutionOrchestrator, HttpPolicyEvaluator, OAuth2Client, PolicyEvaluator, QuotaEnforcer,
    RuleBasedPolicyEvaluator, StateCodec, StateSecret,
};
use conduit_storage::{CatalogStore, CredentialCipher, InMemoryCredentialStore, TenantDirectory};
use secrecy::ExposeSecret;

use crate::config::ConduitConfig;
use crate::error::{ApiError, ApiResult};
use crate::redirect::RedirectAllowList;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ExecutionOrchestrator>,
    /// OAuth2 redirect URI handed to providers.
    pub redirect_uri: String,
    /// Origins the OAuth2 callback may send the browser on to.
    pub redirect_origins: Arc<RedirectAllowList>,
    pub start_time: Instant,
}

impl AppState {
    /// Post-link redirects are limited to the redirect URI's own origin
    /// until [`AppState::with_redirect_origins`] widens the list.
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>, redirect_uri: impl Into<String>) -> Self {
        let redirect_uri = redirect_uri.into();
        Self {
            orchestrator,
            redirect_origins: Arc::new(RedirectAllowList::new([&redirect_uri])),
            redirect_uri,
            start_time: Instant::now(),
        }
    }

    pub fn with_redirect_origins(mut self, origins: RedirectAllowList) -> Self {
        self.redirect_origins = Arc::new(origins);
        self
    }

    /// Load the catalog and directory files and wire the engine.
    pub fn build(config: &ConduitConfig) -> ApiResult<Self> {
        config.validate()?;

        let raw_catalog = std::fs::read_to_string(&config.catalog_path).map_err(|e| {
            ApiError::internal_error(format!(
                "Failed to read catalog {}: {}",
                config.catalog_path.display(),
                e
            ))
        })?;
        let catalog = CatalogStore::from_json(&raw_catalog)?;
        let directory = TenantDirectory::from_file(&config.directory_path)?;

        let cipher = match &config.encryption_key {
            Some(key) => CredentialCipher::from_base64(key.expose_secret())?,
            None => {
                tracing::warn!("CONDUIT_ENCRYPTION_KEY not set, using an ephemeral key");
                CredentialCipher::generate()
            }
        };
        let state_secret = config
            .state_secret
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .unwrap_or_default();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http = reqwest::Client::new();
        let engine = &config.engine;

        let credentials = CredentialManager::new(
            Arc::new(InMemoryCredentialStore::new(cipher)),
            OAuth2Client::new(http.clone()),
            StateCodec::new(
                StateSecret::new(state_secret)?,
                config.oauth2_state_ttl_secs,
                clock.clone(),
            ),
            clock.clone(),
            engine.refresh_timeout,
        );
        let evaluator: Arc<dyn PolicyEvaluator> = match &config.policy_endpoint {
            Some(endpoint) => Arc::new(HttpPolicyEvaluator::new(http.clone(), endpoint.clone())),
            None => Arc::new(RuleBasedPolicyEvaluator),
        };

        let orchestrator = ExecutionOrchestrator::new(
            Arc::new(catalog),
            Arc::new(directory),
            Arc::new(credentials),
            Arc::new(Dispatcher::new(http, builtin_registry(), engine.dispatch_timeout)),
            Arc::new(AccessControlEvaluator::new(
                evaluator,
                engine.policy_fallback,
                engine.policy_timeout,
            )),
            Arc::new(QuotaEnforcer::new(clock)),
        );

        tracing::info!(
            apps = orchestrator.catalog().snapshot().app_count(),
            functions = orchestrator.catalog().snapshot().function_count(),
            policy_endpoint = ?config.policy_endpoint,
            "Engine initialized"
        );
        Ok(Self::new(Arc::new(orchestrator), config.redirect_uri())
            .with_redirect_origins(config.redirect_allow_list()))
    }
}
