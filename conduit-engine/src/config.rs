//! Engine timing and policy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for one outbound dispatch call.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for a token refresh or code exchange.
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for one policy evaluator call.
pub const DEFAULT_POLICY_TIMEOUT_MS: u64 = 5_000;

/// What to do when the policy evaluator errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyFallback {
    /// Deny the call.
    #[default]
    FailClosed,
    /// Use the deterministic rule-based evaluator's verdict.
    RuleBased,
}

impl std::str::FromStr for PolicyFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "closed" | "deny" => Ok(PolicyFallback::FailClosed),
            "rule_based" | "rules" => Ok(PolicyFallback::RuleBased),
            other => Err(format!("unknown policy fallback: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatch_timeout: Duration,
    pub refresh_timeout: Duration,
    pub policy_timeout: Duration,
    pub policy_fallback: PolicyFallback,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_millis(DEFAULT_DISPATCH_TIMEOUT_MS),
            refresh_timeout: Duration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
            policy_timeout: Duration::from_millis(DEFAULT_POLICY_TIMEOUT_MS),
            policy_fallback: PolicyFallback::FailClosed,
        }
    }
}
