//! Conduit Core - Entity Types
//!
//! Pure data structures shared by every other crate: catalog definitions,
//! the parameter contract, security schemes, tenancy records, execution
//! shapes and the error taxonomy. No I/O lives here.

pub mod catalog;
pub mod error;
pub mod execution;
pub mod identity;
pub mod params;
pub mod security;
pub mod tenancy;

pub use catalog::{
    path_placeholders, App, ConnectorProtocol, Function, HttpMethod, Protocol, RestProtocol,
    FUNCTION_NAME_SEPARATOR,
};
pub use error::{
    AuthenticationError, AuthorizationError, ConduitError, ConduitResult, ConfigError,
    ConnectorError, ErrorKind, QuotaError, StorageError, UpstreamError, ValidationError,
};
pub use execution::{
    ExecutionFailure, ExecutionRequest, ExecutionResult, ExecutionStage, ExecutionUsage,
};
pub use identity::{
    AgentId, Clock, EntityIdType, FixedClock, LinkedAccountId, ProjectId, SystemClock, Timestamp,
};
pub use params::{
    AssembledArguments, FieldFormat, FieldType, FunctionParameters, GroupSchema, ParameterEntry,
    ParameterField, ParameterGroup,
};
pub use security::{
    ApiKeyCredentials, ApiKeyScheme, CredentialLocation, HttpBasicCredentials, HttpBasicScheme,
    OAuth2Credentials, OAuth2Scheme, SecurityCredentials, SecurityScheme, SecuritySchemeKind,
    TokenEndpointAuthMethod,
};
pub use tenancy::{
    Agent, AppConfiguration, LinkedAccount, LinkedAccountKey, Project, QuotaPeriod, QuotaPolicy,
};
