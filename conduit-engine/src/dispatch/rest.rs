//! REST strategy: one templated HTTP request per call

use super::{parse_body, scalar_string, DispatchOutcome};
use crate::credentials::ResolvedCredentials;
use conduit_core::{
    AssembledArguments, ConduitResult, CredentialLocation, HttpMethod, ParameterGroup,
    RestProtocol, UpstreamError, ValidationError,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, Method, Url};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RestDispatcher {
    http: Client,
}

fn invalid_request(reason: impl Into<String>) -> UpstreamError {
    UpstreamError::InvalidRequest {
        reason: reason.into(),
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

/// Server URL joined with the path template, placeholders substituted.
/// Each path segment is percent-encoded separately.
pub(crate) fn render_url(
    server_url: &str,
    template: &str,
    path_args: Option<&Map<String, Value>>,
) -> ConduitResult<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| invalid_request(format!("invalid server_url {}: {}", server_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(invalid_request(format!("server_url {} cannot be a base", server_url)).into());
    }

    let mut segments = Vec::new();
    for raw in template.split('/').filter(|s| !s.is_empty()) {
        let mut rendered = String::new();
        let mut substituted = None;
        let mut rest = raw;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start + 1..].find('}') else {
                break;
            };
            let name = &rest[start + 1..start + 1 + len];
            let value = path_args
                .and_then(|args| args.get(name))
                .filter(|v| !v.is_null())
                .ok_or_else(|| ValidationError::MissingPathParameter {
                    placeholder: name.to_string(),
                })?;
            rendered.push_str(&rest[..start]);
            rendered.push_str(&scalar_string(value));
            substituted.get_or_insert(name);
            rest = &rest[start + len + 2..];
        }
        rendered.push_str(rest);
        // The url crate drops or collapses these instead of encoding them.
        if let Some(name) = substituted {
            if matches!(rendered.as_str(), "" | "." | "..") {
                return Err(ValidationError::InvalidFormat {
                    field: format!("path.{}", name),
                    format: "a non-empty path segment other than '.' or '..'".into(),
                }
                .into());
            }
        }
        segments.push(rendered);
    }

    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| invalid_request("server_url cannot carry a path"))?;
        path.pop_if_empty();
        path.extend(segments.iter());
    }
    Ok(url)
}

fn append_query(url: &mut Url, args: &Map<String, Value>) {
    let mut query = url.query_pairs_mut();
    for (name, value) in args {
        match value {
            Value::Array(items) => {
                for item in items {
                    query.append_pair(name, &scalar_string(item));
                }
            }
            Value::Null => {}
            other => {
                query.append_pair(name, &scalar_string(other));
            }
        }
    }
}

fn header_entry(name: &str, value: &str) -> ConduitResult<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| invalid_request(format!("invalid header name {}: {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| invalid_request(format!("invalid value for header {}", name)))?;
    Ok((header_name, header_value))
}

impl RestDispatcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn call(
        &self,
        protocol: &RestProtocol,
        arguments: &AssembledArguments,
        credentials: &ResolvedCredentials,
        timeout: Duration,
    ) -> ConduitResult<DispatchOutcome> {
        let mut url = render_url(
            &protocol.server_url,
            &protocol.path,
            arguments.group(ParameterGroup::Path),
        )?;
        if let Some(query) = arguments.group(ParameterGroup::Query) {
            append_query(&mut url, query);
        }

        let mut headers = HeaderMap::new();
        if let Some(args) = arguments.group(ParameterGroup::Header) {
            for (name, value) in args {
                let (name, value) = header_entry(name, &scalar_string(value))?;
                headers.insert(name, value);
            }
        }
        let mut cookies: Vec<String> = arguments
            .group(ParameterGroup::Cookie)
            .map(|args| {
                args.iter()
                    .map(|(k, v)| format!("{}={}", k, scalar_string(v)))
                    .collect()
            })
            .unwrap_or_default();
        let mut body = arguments
            .group(ParameterGroup::Body)
            .cloned()
            .unwrap_or_default();

        if let Some(injection) = credentials.injection() {
            match injection.location {
                CredentialLocation::Header => {
                    let (name, value) = header_entry(&injection.name, &injection.value)?;
                    headers.insert(name, value);
                }
                CredentialLocation::Query => {
                    url.query_pairs_mut()
                        .append_pair(&injection.name, &injection.value);
                }
                CredentialLocation::Cookie => {
                    cookies.push(format!("{}={}", injection.name, injection.value));
                }
                CredentialLocation::Body => {
                    body.insert(injection.name, Value::String(injection.value));
                }
            }
        }
        if !cookies.is_empty() {
            let (_, value) = header_entry(COOKIE.as_str(), &cookies.join("; "))?;
            headers.insert(COOKIE, value);
        }

        debug!(
            method = protocol.method.as_str(),
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "Sending REST request"
        );
        let mut request = self
            .http
            .request(method(protocol.method), url)
            .headers(headers)
            .timeout(timeout);
        if protocol.method.allows_body() && !body.is_empty() {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }
            } else {
                UpstreamError::Transport {
                    reason: e.without_url().to_string(),
                }
            }
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }
            } else {
                UpstreamError::Transport {
                    reason: format!("failed to read response body: {}", e.without_url()),
                }
            }
        })?;
        let data = parse_body(&text);

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: data,
            }
            .into());
        }
        Ok(DispatchOutcome::new(data, Some(status.as_u16())))
    }
}
