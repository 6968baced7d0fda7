//! Conduit Test Utilities
//!
//! Shared test infrastructure for the Conduit workspace:
//! - Fixtures: a small catalog, tenant directory and a fully wired engine
//! - Mock policy evaluators and connectors
//! - A hand-driven clock
//! - Proptest generators for parameter contracts
//! - Assertions on execution results

pub use conduit_core::{
    Agent, AgentId, App, AppConfiguration, AssembledArguments, ConduitError, ConduitResult,
    EntityIdType, ErrorKind, ExecutionRequest, ExecutionResult, FieldFormat, FieldType, Function,
    FunctionParameters, GroupSchema, LinkedAccount, LinkedAccountId, LinkedAccountKey, ParameterField,
    ParameterGroup, Project, ProjectId, QuotaPeriod, QuotaPolicy, SecurityCredentials,
    SecurityScheme, SecuritySchemeKind,
};

use async_trait::async_trait;
use conduit_engine::{
    ConnectorContext, ConnectorHandler, DispatchOutcome, PolicyEvaluator, PolicyVerdict,
};
use serde_json::Value;
use conduit_core::Clock;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// MOCK POLICY EVALUATORS
// ============================================================================

/// Returns a fixed verdict and counts calls.
#[derive(Debug)]
pub struct StaticPolicyEvaluator {
    verdict: PolicyVerdict,
    calls: AtomicUsize,
}

impl StaticPolicyEvaluator {
    pub fn allow_all() -> Self {
        Self {
            verdict: PolicyVerdict::allow(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn deny_all(reason: impl Into<String>) -> Self {
        Self {
            verdict: PolicyVerdict::deny(reason),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyEvaluator for StaticPolicyEvaluator {
    async fn evaluate(
        &self,
        _instruction: &str,
        _function_name: &str,
        _arguments: &Value,
    ) -> ConduitResult<PolicyVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

/// Always errors, as an unreachable evaluator would.
#[derive(Debug, Default)]
pub struct FailingPolicyEvaluator;

#[async_trait]
impl PolicyEvaluator for FailingPolicyEvaluator {
    async fn evaluate(&self, _: &str, _: &str, _: &Value) -> ConduitResult<PolicyVerdict> {
        Err(conduit_core::UpstreamError::Transport {
            reason: "policy evaluator offline".to_string(),
        }
        .into())
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Clock that only moves when the test moves it.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MOCK CONNECTORS
// ============================================================================

/// Records the assembled arguments of every call and echoes them back,
/// charging `units` per call.
#[derive(Debug)]
pub struct RecordingConnector {
    name: String,
    units: u32,
    calls: Mutex<Vec<Value>>,
}

impl RecordingConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: 1,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConnectorHandler for RecordingConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        ctx: ConnectorContext<'_>,
    ) -> Result<DispatchOutcome, conduit_core::ConnectorError> {
        let arguments = ctx.arguments.to_value();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(arguments.clone());
        }
        Ok(DispatchOutcome::new(arguments, None).with_units(self.units))
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for parameter contracts and caller input.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;

    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    pub fn arb_scalar_type() -> impl Strategy<Value = FieldType> {
        prop_oneof![
            Just(FieldType::String),
            Just(FieldType::Integer),
            Just(FieldType::Boolean),
        ]
    }

    /// A value valid for a scalar type.
    pub fn sample_value(field_type: FieldType) -> Value {
        match field_type {
            FieldType::String => json!("value"),
            FieldType::Integer => json!(7),
            FieldType::Number => json!(1.5),
            FieldType::Boolean => json!(true),
            FieldType::Array => json!([]),
            FieldType::Object => json!({}),
        }
    }

    /// A scalar field. Hidden required fields always carry a default, since
    /// nothing else could satisfy them without an injected credential.
    pub fn arb_parameter_field() -> impl Strategy<Value = ParameterField> {
        (
            arb_field_name(),
            arb_scalar_type(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(name, field_type, visible, required, has_default)| {
                let mut field = ParameterField::new(name, field_type);
                field.visible = visible;
                field.required = required;
                if has_default || (!visible && required) {
                    field.default = Some(sample_value(field_type));
                }
                field
            })
    }

    pub fn arb_group_schema(group: ParameterGroup) -> impl Strategy<Value = GroupSchema> {
        prop::collection::btree_map(arb_field_name(), arb_parameter_field(), 0..6).prop_map(
            move |fields: BTreeMap<String, ParameterField>| {
                let fields = fields
                    .into_iter()
                    .map(|(name, mut field)| {
                        field.name = name;
                        field
                    })
                    .collect();
                GroupSchema::new(group, fields)
            },
        )
    }

    pub fn arb_function_parameters() -> impl Strategy<Value = FunctionParameters> {
        (
            arb_group_schema(ParameterGroup::Path),
            arb_group_schema(ParameterGroup::Query),
            arb_group_schema(ParameterGroup::Header),
            arb_group_schema(ParameterGroup::Body),
        )
            .prop_map(|(path, query, header, body)| {
                FunctionParameters::new(vec![path, query, header, body])
            })
    }

    /// Caller input supplying every visible required field that has no default.
    pub fn complete_arguments(parameters: &FunctionParameters) -> Value {
        let mut groups = Map::new();
        for group in &parameters.groups {
            let values: Map<String, Value> = group
                .fields
                .iter()
                .filter(|f| f.visible && f.required && f.default.is_none())
                .map(|f| (f.name.clone(), sample_value(f.field_type)))
                .collect();
            if !values.is_empty() {
                groups.insert(group.group.as_str().to_string(), Value::Object(values));
            }
        }
        Value::Object(groups)
    }

    pub fn arb_quota_policy() -> impl Strategy<Value = QuotaPolicy> {
        (
            0u32..100,
            prop_oneof![Just(QuotaPeriod::Daily), Just(QuotaPeriod::Monthly)],
        )
            .prop_map(|(limit, period)| QuotaPolicy { limit, period })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! A two-App catalog wired into a complete engine.
    //!
    //! App `X` is an OAuth2 mail service, App `Y` an API-key service with
    //! App-wide default credentials. Every server URL points at the given
    //! mock server.

    use super::*;
    use conduit_core::{
        ApiKeyCredentials, ApiKeyScheme, ConnectorProtocol, CredentialLocation, HttpMethod,
        OAuth2Credentials, OAuth2Scheme, Protocol, RestProtocol, TokenEndpointAuthMethod,
    };
    use conduit_engine::{
        builtin_registry, AccessControlEvaluator, ConnectorRegistry, CredentialManager,
        Dispatcher, ExecutionOrchestrator, OAuth2Client, PolicyFallback, QuotaEnforcer,
        RuleBasedPolicyEvaluator, StateCodec, StateSecret,
    };
    use conduit_storage::{
        CatalogSnapshot, CatalogStore, CredentialCipher, CredentialStore, InMemoryCredentialStore,
        TenantDirectory,
    };
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fixed "now" of every fixture clock.
    pub const NOW: i64 = 1_700_000_000;
    pub const API_KEY: &str = "agent-key-123";
    pub const STATE_SECRET: &str = "test-state-secret";
    pub const OWNER: &str = "owner-1";

    pub fn x_oauth2_scheme(server: &str) -> OAuth2Scheme {
        OAuth2Scheme {
            location: CredentialLocation::Header,
            name: "Authorization".into(),
            prefix: Some("Bearer".into()),
            client_id: "x-client".into(),
            client_secret: "x-secret".into(),
            scope: "mail.send mail.read".into(),
            authorize_url: format!("{}/authorize", server),
            access_token_url: format!("{}/token", server),
            refresh_token_url: format!("{}/token", server),
            token_endpoint_auth_method: TokenEndpointAuthMethod::ClientSecretPost,
            scope_param: "scope".into(),
            token_response_path: None,
            extra_authorize_params: BTreeMap::from([
                ("prompt".to_string(), "consent".to_string()),
                ("access_type".to_string(), "offline".to_string()),
            ]),
        }
    }

    pub fn x_app(server: &str) -> App {
        App {
            name: "X".into(),
            description: "Mail service".into(),
            categories: vec!["communication".into()],
            security_schemes: vec![SecurityScheme::OAuth2(x_oauth2_scheme(server))],
            default_credentials: Vec::new(),
            active: true,
            unauthorized_retry: true,
        }
    }

    pub fn y_app() -> App {
        App {
            name: "Y".into(),
            description: "Resource service".into(),
            categories: vec!["devops".into()],
            security_schemes: vec![SecurityScheme::ApiKey(ApiKeyScheme {
                location: CredentialLocation::Header,
                name: "X-Api-Key".into(),
                prefix: None,
            })],
            default_credentials: vec![SecurityCredentials::ApiKey(ApiKeyCredentials {
                secret_key: "y-default-key".into(),
            })],
            active: true,
            unauthorized_retry: false,
        }
    }

    fn rest(method: HttpMethod, path: &str, server: &str) -> Protocol {
        Protocol::Rest(RestProtocol {
            method,
            path: path.into(),
            server_url: server.into(),
        })
    }

    fn auth_header() -> GroupSchema {
        GroupSchema::new(
            ParameterGroup::Header,
            vec![ParameterField::new("authorization", FieldType::String)
                .required()
                .hidden()],
        )
    }

    pub fn functions(server: &str) -> Vec<Function> {
        vec![
            Function {
                name: "X__SEND_EMAIL".into(),
                description: "Send an email".into(),
                protocol: rest(HttpMethod::Post, "/messages/send", server),
                parameters: FunctionParameters::new(vec![
                    auth_header(),
                    GroupSchema::new(
                        ParameterGroup::Body,
                        vec![
                            ParameterField::new("recipient", FieldType::String)
                                .required()
                                .with_format(FieldFormat::Email),
                            ParameterField::new("body", FieldType::String).required(),
                            ParameterField::new("subject", FieldType::String),
                        ],
                    ),
                ]),
            },
            Function {
                name: "X__GET_MESSAGE".into(),
                description: "Fetch one message".into(),
                protocol: rest(HttpMethod::Get, "/messages/{message_id}", server),
                parameters: FunctionParameters::new(vec![
                    auth_header(),
                    GroupSchema::new(
                        ParameterGroup::Path,
                        vec![ParameterField::new("message_id", FieldType::String).required()],
                    ),
                    GroupSchema::new(
                        ParameterGroup::Query,
                        vec![ParameterField::new("format", FieldType::String)
                            .required()
                            .with_enum(vec![json!("full"), json!("minimal")])
                            .with_default(json!("full"))],
                    ),
                ]),
            },
            Function {
                name: "X__UPDATE_LABEL".into(),
                description: "Update a label".into(),
                protocol: rest(HttpMethod::Patch, "/labels/{label_id}", server),
                parameters: FunctionParameters::new(vec![
                    auth_header(),
                    GroupSchema::new(
                        ParameterGroup::Path,
                        vec![ParameterField::new("label_id", FieldType::String).required()],
                    ),
                    GroupSchema::new(
                        ParameterGroup::Body,
                        vec![
                            ParameterField::new("name", FieldType::String),
                            ParameterField::new("color", FieldType::Object).with_properties(vec![
                                ParameterField::new("background_color", FieldType::String)
                                    .required(),
                                ParameterField::new("text_color", FieldType::String)
                                    .with_default(json!("#000000")),
                            ]),
                        ],
                    ),
                ]),
            },
            Function {
                name: "X__SEND_RAW".into(),
                description: "Send an email composed by the mail connector".into(),
                protocol: Protocol::Connector(ConnectorProtocol {
                    handler: "mail.send".into(),
                    server_url: Some(server.into()),
                    options: json!({"path": "/mail/send"}),
                }),
                parameters: FunctionParameters::new(vec![GroupSchema::new(
                    ParameterGroup::Body,
                    vec![
                        ParameterField::new("recipient", FieldType::String)
                            .required()
                            .with_format(FieldFormat::Email),
                        ParameterField::new("subject", FieldType::String),
                        ParameterField::new("body", FieldType::String).required(),
                        ParameterField::new("cc", FieldType::Array).with_items(
                            ParameterField::new("address", FieldType::String)
                                .with_format(FieldFormat::Email),
                        ),
                    ],
                )]),
            },
            Function {
                name: "Y__DELETE_X".into(),
                description: "Delete a resource".into(),
                protocol: rest(HttpMethod::Delete, "/things/{id}", server),
                parameters: FunctionParameters::new(vec![GroupSchema::new(
                    ParameterGroup::Path,
                    vec![ParameterField::new("id", FieldType::String).required()],
                )]),
            },
            Function {
                name: "Y__LIST_X".into(),
                description: "List resources".into(),
                protocol: rest(HttpMethod::Get, "/things", server),
                parameters: FunctionParameters::default(),
            },
        ]
    }

    pub fn catalog(server: &str) -> CatalogSnapshot {
        CatalogSnapshot::build(vec![x_app(server), y_app()], functions(server))
            .expect("fixture catalog is valid")
    }

    pub fn project(quota: Option<QuotaPolicy>) -> Project {
        Project {
            id: ProjectId::now_v7(),
            name: "acme".into(),
            quota,
            app_configurations: vec![
                AppConfiguration::new("X", SecuritySchemeKind::OAuth2),
                AppConfiguration::new("Y", SecuritySchemeKind::ApiKey),
            ],
        }
    }

    pub fn agent(project_id: ProjectId) -> Agent {
        Agent {
            id: AgentId::now_v7(),
            project_id,
            name: "assistant".into(),
            allowed_apps: BTreeSet::from(["X".to_string(), "Y".to_string()]),
            custom_instructions: BTreeMap::new(),
            api_key_sha256: None,
        }
    }

    pub fn oauth2_credentials(
        access_token: &str,
        expires_at: Option<i64>,
        refresh_token: Option<&str>,
    ) -> SecurityCredentials {
        SecurityCredentials::OAuth2(OAuth2Credentials {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            expires_at,
            refresh_token: refresh_token.map(str::to_string),
            raw_token_response: json!({}),
        })
    }

    /// Knobs for [`TestHarness::start`].
    pub struct HarnessOptions {
        pub quota: Option<QuotaPolicy>,
        pub allowed_apps: BTreeSet<String>,
        pub custom_instructions: BTreeMap<String, String>,
        /// `None` uses the rule-based evaluator.
        pub policy: Option<Arc<dyn PolicyEvaluator>>,
        pub fallback: PolicyFallback,
        pub connectors: ConnectorRegistry,
        pub dispatch_timeout: Duration,
        pub refresh_timeout: Duration,
        /// Shared by every engine component; starts at [`NOW`].
        pub clock: Arc<ManualClock>,
    }

    impl Default for HarnessOptions {
        fn default() -> Self {
            Self {
                quota: None,
                allowed_apps: BTreeSet::from(["X".to_string(), "Y".to_string()]),
                custom_instructions: BTreeMap::new(),
                policy: None,
                fallback: PolicyFallback::FailClosed,
                connectors: builtin_registry(),
                dispatch_timeout: Duration::from_secs(5),
                refresh_timeout: Duration::from_secs(5),
                clock: Arc::new(ManualClock::new(NOW)),
            }
        }
    }

    /// A fully wired engine over in-memory stores.
    pub struct TestHarness {
        pub orchestrator: Arc<ExecutionOrchestrator>,
        pub store: Arc<InMemoryCredentialStore>,
        pub clock: Arc<ManualClock>,
        pub project: Project,
        pub agent: Agent,
    }

    impl TestHarness {
        pub fn start(server: &str, options: HarnessOptions) -> Self {
            let clock = options.clock;
            let dyn_clock: Arc<dyn Clock> = clock.clone();

            let project = project(options.quota);
            let mut agent = agent(project.id);
            agent.allowed_apps = options.allowed_apps;
            agent.custom_instructions = options.custom_instructions;

            let directory = TenantDirectory::new();
            directory.insert_project(project.clone());
            directory
                .insert_agent_with_key(agent.clone(), API_KEY)
                .expect("fixture agent is valid");
            let agent = directory.agent(agent.id).expect("agent was just inserted");

            let store = Arc::new(InMemoryCredentialStore::new(CredentialCipher::generate()));
            let state = StateCodec::new(
                StateSecret::new(STATE_SECRET.to_string()).expect("non-empty secret"),
                600,
                dyn_clock.clone(),
            );
            let http = reqwest::Client::new();
            let credentials = CredentialManager::new(
                store.clone(),
                OAuth2Client::new(http.clone()),
                state,
                dyn_clock.clone(),
                options.refresh_timeout,
            );
            let dispatcher = Dispatcher::new(http, options.connectors, options.dispatch_timeout);
            let evaluator: Arc<dyn PolicyEvaluator> = match options.policy {
                Some(policy) => policy,
                None => Arc::new(RuleBasedPolicyEvaluator),
            };
            let access =
                AccessControlEvaluator::new(evaluator, options.fallback, Duration::from_secs(1));

            let orchestrator = ExecutionOrchestrator::new(
                Arc::new(CatalogStore::new(catalog(server))),
                Arc::new(directory),
                Arc::new(credentials),
                Arc::new(dispatcher),
                Arc::new(access),
                Arc::new(QuotaEnforcer::new(dyn_clock)),
            );

            Self {
                orchestrator: Arc::new(orchestrator),
                store,
                clock,
                project,
                agent,
            }
        }

        pub fn key(&self, app_name: &str, owner: &str) -> LinkedAccountKey {
            LinkedAccountKey::new(self.project.id, app_name, owner)
        }

        /// Link an X account holding the given OAuth2 token.
        pub async fn link_oauth2(
            &self,
            owner: &str,
            access_token: &str,
            expires_at: Option<i64>,
            refresh_token: Option<&str>,
        ) -> LinkedAccount {
            let app = self
                .orchestrator
                .catalog()
                .get_app("X")
                .expect("fixture app X");
            self.orchestrator
                .credentials()
                .link_account(
                    &app,
                    self.key("X", owner),
                    SecuritySchemeKind::OAuth2,
                    Some(oauth2_credentials(access_token, expires_at, refresh_token)),
                )
                .await
                .expect("link X account")
        }

        /// Link a Y account; `None` falls back to the App default key.
        pub async fn link_api_key(&self, owner: &str, secret_key: Option<&str>) -> LinkedAccount {
            let app = self
                .orchestrator
                .catalog()
                .get_app("Y")
                .expect("fixture app Y");
            self.orchestrator
                .credentials()
                .link_account(
                    &app,
                    self.key("Y", owner),
                    SecuritySchemeKind::ApiKey,
                    secret_key.map(|k| {
                        SecurityCredentials::ApiKey(ApiKeyCredentials {
                            secret_key: k.to_string(),
                        })
                    }),
                )
                .await
                .expect("link Y account")
        }

        /// Current stored OAuth2 access token of an account.
        pub async fn stored_access_token(&self, account: &LinkedAccount) -> Option<String> {
            match self.store.get_by_id(account.id).await.ok()??.credentials? {
                SecurityCredentials::OAuth2(c) => Some(c.access_token),
                _ => None,
            }
        }

        pub fn request(&self, function_name: &str, arguments: Value, owner: &str) -> ExecutionRequest {
            ExecutionRequest {
                agent_id: self.agent.id,
                function_name: function_name.to_string(),
                arguments,
                linked_account_owner_id: owner.to_string(),
            }
        }

        pub async fn execute(&self, function_name: &str, arguments: Value, owner: &str) -> ExecutionResult {
            self.orchestrator
                .execute(self.request(function_name, arguments, owner))
                .await
        }

        pub fn quota_used(&self) -> u32 {
            self.orchestrator.quota().usage(&self.project).used
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on [`ExecutionResult`].

    use super::*;

    #[track_caller]
    pub fn assert_success(result: &ExecutionResult) {
        assert!(result.success, "Expected success, got: {:?}", result.error);
    }

    #[track_caller]
    pub fn assert_error_kind(result: &ExecutionResult, kind: ErrorKind) {
        assert!(!result.success, "Expected {:?}, got success", kind);
        assert_eq!(result.error_kind(), Some(kind), "Unexpected failure: {:?}", result.error);
    }

    /// Assert the failure message names `field`.
    #[track_caller]
    pub fn assert_error_mentions(result: &ExecutionResult, needle: &str) {
        let message = result
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or_default();
        assert!(message.contains(needle), "Expected error mentioning {:?}, got {:?}", needle, message);
    }
}
