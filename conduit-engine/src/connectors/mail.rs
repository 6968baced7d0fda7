//! `mail.send`: compose an RFC 5322 message and post it as `{"raw": ...}`

use crate::dispatch::{authorize, parse_body, render_url, ConnectorContext, ConnectorHandler, DispatchOutcome};
use ::async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use conduit_core::{ConnectorError, ParameterGroup};
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_SEND_PATH: &str = "/users/me/messages/send";

#[derive(Debug, Clone, Copy, Default)]
pub struct MailSendConnector;

fn header_safe(name: &str, value: &str) -> Result<(), String> {
    if value.contains(['\r', '\n']) {
        return Err(format!("{} must not contain line breaks", name));
    }
    Ok(())
}

/// Plain-text message with CRLF line endings.
pub fn compose_message(
    recipient: &str,
    subject: &str,
    body: &str,
    cc: &[String],
) -> Result<String, String> {
    header_safe("recipient", recipient)?;
    header_safe("subject", subject)?;
    for address in cc {
        header_safe("cc", address)?;
    }

    let mut message = format!("To: {}\r\n", recipient);
    if !cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", cc.join(", ")));
    }
    message.push_str(&format!("Subject: {}\r\n", subject));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("\r\n");
    message.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));
    Ok(message)
}

fn cc_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl ConnectorHandler for MailSendConnector {
    fn name(&self) -> &str {
        "mail.send"
    }

    async fn call(&self, ctx: ConnectorContext<'_>) -> Result<DispatchOutcome, ConnectorError> {
        let arg = |name: &str| ctx.arguments.get(ParameterGroup::Body, name);
        let recipient = arg("recipient")
            .and_then(Value::as_str)
            .ok_or_else(|| ctx.failed("recipient is required"))?;
        let body = arg("body").and_then(Value::as_str).unwrap_or_default();
        let subject = arg("subject").and_then(Value::as_str).unwrap_or_default();
        let cc = cc_list(arg("cc"));

        let message = compose_message(recipient, subject, body, &cc).map_err(|r| ctx.failed(r))?;
        let raw = URL_SAFE.encode(message.as_bytes());

        let url = render_url(
            ctx.server_url()?,
            ctx.option("path").unwrap_or(DEFAULT_SEND_PATH),
            None,
        )
        .map_err(|e| ctx.failed(e.to_string()))?;
        debug!(function_name = %ctx.function.name, cc = cc.len(), "Sending mail");

        let request = authorize(ctx.http.post(url).json(&json!({ "raw": raw })), ctx.credentials)
            .map_err(|r| ctx.failed(r))?;
        let response = request
            .send()
            .await
            .map_err(|e| ctx.failed(format!("send failed: {}", e.without_url())))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ctx.failed(format!("failed to read response: {}", e.without_url())))?;
        let data = parse_body(&text);
        if !status.is_success() {
            return Err(ConnectorError::Status {
                handler: self.name().to_string(),
                status: status.as_u16(),
                body: data,
            });
        }
        Ok(DispatchOutcome::new(data, Some(status.as_u16())))
    }
}
