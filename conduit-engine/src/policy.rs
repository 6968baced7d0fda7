//! Access Control Evaluator and Policy Evaluator collaborators
//!
//! The permission chain is checked in a fixed order and stops at the first
//! failure:
//!
//! 1. the Function's App is in the Agent's `allowed_apps`
//! 2. the App is active
//! 3. the Project has an enabled configuration for the App that enables the Function
//! 4. a custom instruction for the Function, if any, is allowed by the policy evaluator
//!
//! An evaluator that errors or times out fails closed unless a rule-based
//! fallback is configured.

use crate::config::PolicyFallback;
use ::async_trait::async_trait;
use conduit_core::{
    Agent, App, AuthorizationError, ConduitResult, Function, Project, UpstreamError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Allow/deny answer for one custom instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyVerdict {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
        }
    }
}

/// Judges a proposed call against a natural-language instruction.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        instruction: &str,
        function_name: &str,
        arguments: &Value,
    ) -> ConduitResult<PolicyVerdict>;
}

// ============================================================================
// HTTP EVALUATOR
// ============================================================================

/// Posts `{instruction, function_name, arguments}` and expects a [`PolicyVerdict`].
#[derive(Debug, Clone)]
pub struct HttpPolicyEvaluator {
    http: Client,
    endpoint: String,
}

impl HttpPolicyEvaluator {
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for HttpPolicyEvaluator {
    async fn evaluate(
        &self,
        instruction: &str,
        function_name: &str,
        arguments: &Value,
    ) -> ConduitResult<PolicyVerdict> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "instruction": instruction,
                "function_name": function_name,
                "arguments": arguments,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                reason: format!("policy evaluator unreachable: {}", e.without_url()),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response
            .json::<PolicyVerdict>()
            .await
            .map_err(|e| UpstreamError::Transport {
                reason: format!("invalid policy verdict: {}", e),
            })?)
    }
}

// ============================================================================
// RULE-BASED EVALUATOR
// ============================================================================

/// Deterministic evaluator: denies when the instruction forbids a verb
/// ("never delete", "do not send", "don't archive") that is also a token of
/// the function name (`GITHUB__DELETE_REPO` has tokens github, delete, repo).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedPolicyEvaluator;

impl RuleBasedPolicyEvaluator {
    /// Verbs the instruction forbids, lowercased.
    pub fn forbidden_verbs(instruction: &str) -> Vec<String> {
        let normalized = instruction.to_lowercase().replace('\u{2019}', "'");
        let words: Vec<&str> = normalized
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();

        let mut verbs = Vec::new();
        let mut i = 0;
        while i < words.len() {
            let skip = match (words[i], words.get(i + 1).copied()) {
                ("never", _) | ("don't", _) | ("dont", _) => Some(1),
                ("do", Some("not")) | ("must", Some("not")) => Some(2),
                _ => None,
            };
            if let Some(skip) = skip {
                if let Some(verb) = words.get(i + skip) {
                    verbs.push((*verb).to_string());
                }
                i += skip;
            } else {
                i += 1;
            }
        }
        verbs
    }

    pub fn verdict(instruction: &str, function_name: &str) -> PolicyVerdict {
        let tokens: Vec<String> = function_name
            .split('_')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        match Self::forbidden_verbs(instruction)
            .into_iter()
            .find(|verb| tokens.contains(verb))
        {
            Some(verb) => PolicyVerdict::deny(format!(
                "instruction forbids '{}': {}",
                verb,
                instruction.trim()
            )),
            None => PolicyVerdict::allow(),
        }
    }
}

#[async_trait]
impl PolicyEvaluator for RuleBasedPolicyEvaluator {
    async fn evaluate(
        &self,
        instruction: &str,
        function_name: &str,
        _arguments: &Value,
    ) -> ConduitResult<PolicyVerdict> {
        Ok(Self::verdict(instruction, function_name))
    }
}

// ============================================================================
// ACCESS CONTROL
// ============================================================================

pub struct AccessControlEvaluator {
    evaluator: Arc<dyn PolicyEvaluator>,
    fallback: PolicyFallback,
    timeout: Duration,
}

impl std::fmt::Debug for AccessControlEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlEvaluator")
            .field("fallback", &self.fallback)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AccessControlEvaluator {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, fallback: PolicyFallback, timeout: Duration) -> Self {
        Self {
            evaluator,
            fallback,
            timeout,
        }
    }

    /// Run the full chain for one proposed call.
    pub async fn check(
        &self,
        agent: &Agent,
        project: &Project,
        app: &App,
        function: &Function,
        arguments: &Value,
    ) -> Result<(), AuthorizationError> {
        if !agent.can_use_app(&app.name) {
            return Err(AuthorizationError::AppNotAllowed {
                agent_id: agent.id,
                app_name: app.name.clone(),
            });
        }
        if !app.active {
            return Err(AuthorizationError::AppInactive {
                app_name: app.name.clone(),
            });
        }
        let config = project.app_configuration(&app.name).ok_or_else(|| {
            AuthorizationError::AppNotConfigured {
                project_id: project.id,
                app_name: app.name.clone(),
            }
        })?;
        if !config.enabled {
            return Err(AuthorizationError::AppConfigurationDisabled {
                project_id: project.id,
                app_name: app.name.clone(),
            });
        }
        if !config.is_function_enabled(&function.name) {
            return Err(AuthorizationError::FunctionDisabled {
                function_name: function.name.clone(),
            });
        }

        let Some(instruction) = agent.instruction_for(&function.name) else {
            return Ok(());
        };
        let verdict = self.evaluate(instruction, &function.name, arguments).await?;
        if verdict.allow {
            debug!(agent_id = %agent.id, function_name = %function.name, "Custom instruction allows call");
            Ok(())
        } else {
            Err(AuthorizationError::PolicyDenied {
                function_name: function.name.clone(),
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "denied by custom instruction".to_string()),
            })
        }
    }

    async fn evaluate(
        &self,
        instruction: &str,
        function_name: &str,
        arguments: &Value,
    ) -> Result<PolicyVerdict, AuthorizationError> {
        let failure = match tokio::time::timeout(
            self.timeout,
            self.evaluator.evaluate(instruction, function_name, arguments),
        )
        .await
        {
            Ok(Ok(verdict)) => return Ok(verdict),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("policy evaluator timed out after {}ms", self.timeout.as_millis()),
        };

        match self.fallback {
            PolicyFallback::RuleBased => {
                warn!(function_name, reason = %failure, "Policy evaluator failed, using rule-based fallback");
                Ok(RuleBasedPolicyEvaluator::verdict(instruction, function_name))
            }
            PolicyFallback::FailClosed => {
                warn!(function_name, reason = %failure, "Policy evaluator failed, denying");
                Err(AuthorizationError::PolicyUnavailable {
                    function_name: function_name.to_string(),
                    reason: failure,
                })
            }
        }
    }
}
