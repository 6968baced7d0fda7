//! Connector strategy: named custom handlers

use super::DispatchOutcome;
use crate::credentials::ResolvedCredentials;
use ::async_trait::async_trait;
use conduit_core::{
    App, AssembledArguments, ConduitResult, ConnectorError, ConnectorProtocol, Function,
};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a handler may use for one call.
#[derive(Clone, Copy)]
pub struct ConnectorContext<'a> {
    pub app: &'a App,
    pub function: &'a Function,
    pub protocol: &'a ConnectorProtocol,
    pub arguments: &'a AssembledArguments,
    pub credentials: &'a ResolvedCredentials,
    pub http: &'a Client,
}

impl ConnectorContext<'_> {
    /// Handler base URL: the protocol's own, else an error naming the handler.
    pub fn server_url(&self) -> Result<&str, ConnectorError> {
        self.protocol
            .server_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConnectorError::Failed {
                handler: self.protocol.handler.clone(),
                reason: "connector requires a server_url".to_string(),
            })
    }

    /// String option from the protocol's static options.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.protocol.options.get(key).and_then(|v| v.as_str())
    }

    pub fn failed(&self, reason: impl Into<String>) -> ConnectorError {
        ConnectorError::Failed {
            handler: self.protocol.handler.clone(),
            reason: reason.into(),
        }
    }
}

/// Custom logic for Functions a single templated request cannot express.
#[async_trait]
pub trait ConnectorHandler: Send + Sync {
    /// Registry key, referenced by `ConnectorProtocol::handler`.
    fn name(&self) -> &str;

    async fn call(&self, ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError>;
}

/// Handlers by name.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    handlers: HashMap<String, Arc<dyn ConnectorHandler>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&mut self, handler: Arc<dyn ConnectorHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn ConnectorHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ConnectorHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) async fn invoke(
        &self,
        ctx: ConnectorContext<'_>,
        timeout: Duration,
    ) -> ConduitResult<DispatchOutcome> {
        let name = ctx.protocol.handler.as_str();
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ConnectorError::HandlerNotFound {
                handler: name.to_string(),
            })?;
        match tokio::time::timeout(timeout, handler.call(ctx)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectorError::Timeout {
                handler: name.to_string(),
                after_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ResolvedSecret;
    use conduit_core::{EntityIdType, LinkedAccountId, Protocol, SecurityScheme};
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl ConnectorHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError> {
            Ok(DispatchOutcome::new(ctx.arguments.to_value(), None))
        }
    }

    struct Slow;

    #[async_trait]
    impl ConnectorHandler for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn call(&self, _ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(DispatchOutcome::new(Value::Null, None))
        }
    }

    fn fixtures(handler: &str) -> (App, Function, ResolvedCredentials) {
        let app = App {
            name: "TOOLS".into(),
            description: String::new(),
            categories: Vec::new(),
            security_schemes: vec![SecurityScheme::NoAuth],
            default_credentials: Vec::new(),
            active: true,
            unauthorized_retry: true,
        };
        let function = Function {
            name: "TOOLS__RUN".into(),
            description: String::new(),
            protocol: Protocol::Connector(ConnectorProtocol {
                handler: handler.into(),
                server_url: None,
                options: json!({"mode": "fast"}),
            }),
            parameters: Default::default(),
        };
        let creds = ResolvedCredentials::new(LinkedAccountId::nil(), SecurityScheme::NoAuth, ResolvedSecret::None);
        (app, function, creds)
    }

    async fn run(registry: &ConnectorRegistry, handler: &str) -> ConduitResult<DispatchOutcome> {
        let (app, function, creds) = fixtures(handler);
        let Protocol::Connector(protocol) = &function.protocol else {
            unreachable!()
        };
        let args = AssembledArguments::new();
        let http = Client::new();
        let ctx = ConnectorContext {
            app: &app,
            function: &function,
            protocol,
            arguments: &args,
            credentials: &creds,
            http: &http,
        };
        assert_eq!(ctx.option("mode"), Some("fast"));
        registry.invoke(ctx, Duration::from_millis(50)).await
    }

    #[tokio::test]
    async fn test_registered_handler_invoked() {
        let registry = ConnectorRegistry::new().with(Arc::new(Echo));
        assert_eq!(registry.names(), vec!["echo"]);
        let outcome = run(&registry, "echo").await.unwrap();
        assert_eq!(outcome.units, 1);
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let err = run(&ConnectorRegistry::new(), "missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let registry = ConnectorRegistry::new().with(Arc::new(Slow));
        let err = run(&registry, "slow").await.unwrap_err();
        assert!(err.timed_out());
    }
}
