//! Conduit Engine - Function Discovery & Execution
//!
//! The components between an agent's call and the third-party API:
//! - [`resolver`]: the visible/required parameter contract
//! - [`credentials`]: linked-account credentials, OAuth2 linking and refresh
//! - [`dispatch`]: REST and connector strategies
//! - [`policy`]: access control and custom-instruction guardrails
//! - [`quota`]: per-project budgets
//! - [`orchestrator`]: the `execute` entry point sequencing all of the above

pub mod config;
pub mod connectors;
pub mod credentials;
pub mod dispatch;
pub mod orchestrator;
pub mod policy;
pub mod quota;
pub mod resolver;

pub use config::{EngineConfig, PolicyFallback};
pub use connectors::{builtin_registry, GraphQlConnector, MailSendConnector};
pub use credentials::{
    CredentialInjection, CredentialManager, LinkRequest, OAuth2Client, PkcePair,
    ResolvedCredentials, ResolvedSecret, StateCodec, StateSecret,
};
pub use dispatch::{
    parse_body, ConnectorContext, ConnectorHandler, ConnectorRegistry, DispatchOutcome,
    Dispatcher, RestDispatcher,
};
pub use orchestrator::ExecutionOrchestrator;
pub use policy::{
    AccessControlEvaluator, HttpPolicyEvaluator, PolicyEvaluator, PolicyVerdict,
    RuleBasedPolicyEvaluator,
};
pub use quota::{QuotaEnforcer, QuotaReservation, QuotaUsage};
pub use resolver::{resolve, InjectedField};
