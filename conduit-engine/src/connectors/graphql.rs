//! `graphql`: post a configured query with the assembled arguments as variables
//!
//! Options: `query` (required), `path` (default `/graphql`) and
//! `variables_key`, which nests the arguments under one variable such as
//! `input`.

use crate::dispatch::{authorize, parse_body, render_url, ConnectorContext, ConnectorHandler, DispatchOutcome};
use ::async_trait::async_trait;
use conduit_core::{ConnectorError, ParameterGroup};
use serde_json::{json, Map, Value};

const DEFAULT_GRAPHQL_PATH: &str = "/graphql";

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphQlConnector;

/// Joined `message`s of a non-empty GraphQL `errors` array.
fn error_messages(response: &Value) -> Option<String> {
    let errors = response.get("errors")?.as_array().filter(|e| !e.is_empty())?;
    let messages: Vec<&str> = errors
        .iter()
        .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
        .collect();
    Some(messages.join("; "))
}

#[async_trait]
impl ConnectorHandler for GraphQlConnector {
    fn name(&self) -> &str {
        "graphql"
    }

    async fn call(&self, ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError> {
        let query = ctx
            .option("query")
            .ok_or_else(|| ctx.failed("connector options carry no query"))?;
        let args = ctx
            .arguments
            .group(ParameterGroup::Body)
            .cloned()
            .unwrap_or_default();
        let variables = match ctx.option("variables_key") {
            Some(key) => {
                let mut wrapped = Map::new();
                wrapped.insert(key.to_string(), Value::Object(args));
                wrapped
            }
            None => args,
        };

        let url = render_url(
            ctx.server_url()?,
            ctx.option("path").unwrap_or(DEFAULT_GRAPHQL_PATH),
            None,
        )
        .map_err(|e| ctx.failed(e.to_string()))?;
        let request = authorize(
            ctx.http
                .post(url)
                .json(&json!({ "query": query, "variables": variables })),
            ctx.credentials,
        )
        .map_err(|r| ctx.failed(r))?;

        let response = request
            .send()
            .await
            .map_err(|e| ctx.failed(format!("request failed: {}", e.without_url())))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ctx.failed(format!("failed to read response: {}", e.without_url())))?;
        let body = parse_body(&text);
        if !status.is_success() {
            return Err(ConnectorError::Status {
                handler: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if let Some(messages) = error_messages(&body) {
            return Err(ctx.failed(format!("GraphQL errors: {}", messages)));
        }
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        Ok(DispatchOutcome::new(data, Some(status.as_u16())))
    }
}
