//! Catalog entity types: Apps and their Functions

use crate::params::FunctionParameters;
use crate::security::{SecurityCredentials, SecurityScheme, SecuritySchemeKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Separator between the App name and the operation in a Function name.
pub const FUNCTION_NAME_SEPARATOR: &str = "__";

fn default_true() -> bool {
    true
}

/// A third-party service integration definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Unique upper-snake identifier, e.g. `GITHUB`.
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub categories: Vec<String>,

    /// Supported schemes with their static configuration.
    pub security_schemes: Vec<SecurityScheme>,

    /// App-wide fallback credentials, at most one per scheme.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_credentials: Vec<SecurityCredentials>,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Whether a 401/403 from this App's API means "credential rejected"
    /// and should trigger one refresh-and-retry.
    #[serde(default = "default_true")]
    pub unauthorized_retry: bool,
}

impl App {
    pub fn scheme(&self, kind: SecuritySchemeKind) -> Option<&SecurityScheme> {
        self.security_schemes.iter().find(|s| s.kind() == kind)
    }

    pub fn supports(&self, kind: SecuritySchemeKind) -> bool {
        self.scheme(kind).is_some()
    }

    pub fn default_credentials(&self, kind: SecuritySchemeKind) -> Option<&SecurityCredentials> {
        self.default_credentials.iter().find(|c| c.kind() == kind)
    }
}

/// HTTP method of a REST Function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Whether a request body is sent for this method.
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

/// Templated REST call description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestProtocol {
    pub method: HttpMethod,
    /// Path template with `{placeholder}` segments.
    pub path: String,
    pub server_url: String,
}

impl RestProtocol {
    /// Placeholder names in the path template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        path_placeholders(&self.path)
    }
}

/// Extract `{name}` placeholders from a path template.
pub fn path_placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                names.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}

/// Named custom handler description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorProtocol {
    /// Registered handler name.
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Handler-specific static options.
    #[serde(default)]
    pub options: Value,
}

/// The closed set of dispatch strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Protocol {
    Rest(RestProtocol),
    Connector(ConnectorProtocol),
}

/// One callable operation on an App.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// `APP__OPERATION`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub parameters: FunctionParameters,
}

impl Function {
    /// App name prefix of the function name.
    pub fn app_name(&self) -> Option<&str> {
        self.name
            .split_once(FUNCTION_NAME_SEPARATOR)
            .map(|(app, _)| app)
            .filter(|app| !app.is_empty())
    }

    /// Tool definition an agent runtime can show to a model.
    pub fn visible_definition(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters.visible_schema(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_placeholders() {
        assert_eq!(
            path_placeholders("/repos/{owner}/{repo}/issues"),
            vec!["owner", "repo"]
        );
        assert!(path_placeholders("/user").is_empty());
        assert_eq!(path_placeholders("/broken/{open"), Vec::<&str>::new());
    }

    #[test]
    fn test_function_app_name() {
        let f = Function {
            name: "GITHUB__CREATE_ISSUE".into(),
            description: String::new(),
            protocol: Protocol::Connector(ConnectorProtocol {
                handler: "x".into(),
                server_url: None,
                options: Value::Null,
            }),
            parameters: FunctionParameters::default(),
        };
        assert_eq!(f.app_name(), Some("GITHUB"));

        let bad = Function {
            name: "__ORPHAN".into(),
            ..f.clone()
        };
        assert_eq!(bad.app_name(), None);
    }

    #[test]
    fn test_protocol_deserialization() {
        let raw = json!({
            "name": "X__PING",
            "protocol": {"type": "rest", "method": "GET", "path": "/ping", "server_url": "https://x.test"}
        });
        let f: Function = serde_json::from_value(raw).unwrap();
        match f.protocol {
            Protocol::Rest(rest) => {
                assert_eq!(rest.method, HttpMethod::Get);
                assert!(!rest.method.allows_body());
            }
            Protocol::Connector(_) => panic!("expected rest"),
        }
    }

    #[test]
    fn test_app_defaults() {
        let app: App = serde_json::from_value(json!({
            "name": "X",
            "security_schemes": [{"type": "no_auth"}]
        }))
        .unwrap();
        assert!(app.active);
        assert!(app.unauthorized_retry);
        assert!(app.supports(SecuritySchemeKind::NoAuth));
        assert!(!app.supports(SecuritySchemeKind::OAuth2));
    }
}
