//! Execution Orchestrator
//!
//! Sequences lookup, access control, quota reservation, schema resolution,
//! credential resolution, dispatch and quota commit for one request, and
//! always answers with an [`ExecutionResult`].
//!
//! Quota is committed only when dispatch ran, whatever its outcome. Every
//! earlier exit, including cancellation of the future, drops the reservation
//! and so refunds it.

use crate::credentials::{CredentialManager, ResolvedCredentials};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::policy::AccessControlEvaluator;
use crate::quota::QuotaEnforcer;
use crate::resolver::{self, InjectedField};
use conduit_core::{
    Agent, AgentId, App, AssembledArguments, AuthenticationError, AuthorizationError,
    ConduitError, ConduitResult, ExecutionRequest, ExecutionResult, ExecutionStage,
    ExecutionUsage, Function, LinkedAccountKey, Project, SecurityScheme, StorageError,
    ValidationError,
};
use conduit_storage::{CatalogStore, TenantDirectory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Units reserved per call before the actual cost is known.
const RESERVATION_UNITS: u32 = 1;

type StageResult<T> = Result<T, (ExecutionStage, ConduitError)>;

fn at<T>(stage: ExecutionStage, result: Result<T, impl Into<ConduitError>>) -> StageResult<T> {
    result.map_err(|e| (stage, e.into()))
}

pub struct ExecutionOrchestrator {
    catalog: Arc<CatalogStore>,
    directory: Arc<TenantDirectory>,
    credentials: Arc<CredentialManager>,
    dispatcher: Arc<Dispatcher>,
    access: Arc<AccessControlEvaluator>,
    quota: Arc<QuotaEnforcer>,
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator")
            .field("dispatcher", &self.dispatcher)
            .field("access", &self.access)
            .field("quota", &self.quota)
            .finish()
    }
}

impl ExecutionOrchestrator {
    pub fn new(
        catalog: Arc<CatalogStore>,
        directory: Arc<TenantDirectory>,
        credentials: Arc<CredentialManager>,
        dispatcher: Arc<Dispatcher>,
        access: Arc<AccessControlEvaluator>,
        quota: Arc<QuotaEnforcer>,
    ) -> Self {
        Self {
            catalog,
            directory,
            credentials,
            dispatcher,
            access,
            quota,
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn quota(&self) -> &Arc<QuotaEnforcer> {
        &self.quota
    }

    /// Run one request to completion.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let span = info_span!(
            "execute",
            function_name = %request.function_name,
            agent_id = %request.agent_id,
        );
        async move {
            let started = Instant::now();
            let mut units = 0;
            let outcome = self.run(&request, &mut units).await;
            let usage = ExecutionUsage {
                elapsed_ms: started.elapsed().as_millis() as u64,
                units,
            };
            match outcome {
                Ok(data) => {
                    info!(elapsed_ms = usage.elapsed_ms, units, "Execution succeeded");
                    ExecutionResult::succeeded(data, usage)
                }
                Err((stage, error)) => {
                    warn!(
                        stage = %stage,
                        kind = %error.kind(),
                        elapsed_ms = usage.elapsed_ms,
                        error = %error,
                        "Execution failed"
                    );
                    ExecutionResult::failed(stage, &error, usage)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &ExecutionRequest, units: &mut u32) -> StageResult<Value> {
        // Lookup
        let agent = at(
            ExecutionStage::AccessControl,
            self.directory
                .agent(request.agent_id)
                .ok_or(AuthorizationError::UnknownAgent {
                    agent_id: request.agent_id,
                }),
        )?;
        let (function, app) = at(
            ExecutionStage::Lookup,
            self.catalog
                .snapshot()
                .function_with_app(&request.function_name)
                .ok_or_else(|| ValidationError::UnknownFunction {
                    name: request.function_name.clone(),
                }),
        )?;
        let project = at(ExecutionStage::Lookup, self.project_of(&agent))?;

        // Access control
        at(
            ExecutionStage::AccessControl,
            self.access
                .check(&agent, &project, &app, &function, &request.arguments)
                .await,
        )?;

        // Quota reservation, held until commit or drop
        let reservation = at(
            ExecutionStage::QuotaReserve,
            self.quota.reserve(&project, RESERVATION_UNITS),
        )?;

        // Schema resolution. The injection target comes from the scheme the
        // Project chose for this App.
        let scheme = project
            .app_configuration(&app.name)
            .and_then(|config| app.scheme(config.security_scheme));
        let injected: Vec<InjectedField<'_>> = scheme
            .and_then(SecurityScheme::injection_target)
            .map(|(location, name)| InjectedField::new(location.group(), name))
            .into_iter()
            .collect();
        let arguments = at(
            ExecutionStage::SchemaResolution,
            resolver::resolve(&function.parameters, &request.arguments, &injected),
        )?;
        debug!(fields = arguments.len(), "Arguments resolved");

        // Credentials
        let key = LinkedAccountKey::new(
            project.id,
            app.name.clone(),
            request.linked_account_owner_id.clone(),
        );
        let account = at(
            ExecutionStage::Credentials,
            self.credentials.linked_account(&key).await,
        )?;
        let creds = at(
            ExecutionStage::Credentials,
            self.credentials.resolve(&app, &account).await,
        )?;

        // Dispatch, with at most one retry after a forced refresh
        let result = self
            .dispatch_with_retry(&app, &function, &arguments, creds)
            .await;
        if let Err(e) = self.credentials.touch(account.id).await {
            warn!(linked_account_id = %account.id, error = %e, "Failed to record linked account use");
        }

        // Quota commit
        match result {
            Ok(outcome) => {
                *units = reservation.commit(outcome.units);
                Ok(outcome.data)
            }
            Err((stage, error)) => {
                if stage == ExecutionStage::Dispatch {
                    *units = reservation.commit(RESERVATION_UNITS);
                }
                Err((stage, error))
            }
        }
    }

    fn project_of(&self, agent: &Agent) -> ConduitResult<Project> {
        self.directory.project(agent.project_id).ok_or_else(|| {
            StorageError::NotFound {
                entity: "Project".to_string(),
                id: agent.project_id.to_string(),
            }
            .into()
        })
    }

    async fn dispatch_with_retry(
        &self,
        app: &App,
        function: &Function,
        arguments: &AssembledArguments,
        creds: ResolvedCredentials,
    ) -> StageResult<DispatchOutcome> {
        match self.dispatcher.dispatch(app, function, arguments, &creds).await {
            Err(ConduitError::Authentication(AuthenticationError::Rejected { status }))
                if creds.is_refreshable() =>
            {
                info!(
                    status,
                    linked_account_id = %creds.linked_account_id,
                    "Credential rejected, refreshing and retrying once"
                );
                // A failed refresh here is still an attempted dispatch.
                let fresh = at(
                    ExecutionStage::Dispatch,
                    self.credentials.force_refresh(&creds).await,
                )?;
                at(
                    ExecutionStage::Dispatch,
                    self.dispatcher.dispatch(app, function, arguments, &fresh).await,
                )
            }
            other => at(ExecutionStage::Dispatch, other),
        }
    }

    /// Tool definitions an Agent may call, optionally limited to one App.
    pub fn discover(&self, agent_id: AgentId, app_name: Option<&str>) -> ConduitResult<Vec<Value>> {
        let agent = self
            .directory
            .agent(agent_id)
            .ok_or(AuthorizationError::UnknownAgent { agent_id })?;
        let project = self.project_of(&agent)?;
        let snapshot = self.catalog.snapshot();

        let mut definitions = Vec::new();
        for name in &agent.allowed_apps {
            if app_name.is_some_and(|wanted| wanted != name) {
                continue;
            }
            let Some(app) = snapshot.app(name).filter(|a| a.active) else {
                continue;
            };
            let Some(config) = project.app_configuration(&app.name).filter(|c| c.enabled) else {
                continue;
            };
            definitions.extend(
                snapshot
                    .functions_for_app(&app.name)
                    .iter()
                    .filter(|f| config.is_function_enabled(&f.name))
                    .map(|f| f.visible_definition()),
            );
        }
        Ok(definitions)
    }
}
