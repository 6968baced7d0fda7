//! Per-call request and result shapes

use crate::error::{ConduitError, ErrorKind};
use crate::identity::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One execution request, as issued by an agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub agent_id: AgentId,
    pub function_name: String,
    /// Raw caller arguments, keyed by parameter group.
    #[serde(default)]
    pub arguments: Value,
    pub linked_account_owner_id: String,
}

/// Orchestrator stage at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Lookup,
    AccessControl,
    QuotaReserve,
    SchemaResolution,
    Credentials,
    Dispatch,
    QuotaCommit,
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStage::Lookup => "lookup",
            ExecutionStage::AccessControl => "access_control",
            ExecutionStage::QuotaReserve => "quota_reserve",
            ExecutionStage::SchemaResolution => "schema_resolution",
            ExecutionStage::Credentials => "credentials",
            ExecutionStage::Dispatch => "dispatch",
            ExecutionStage::QuotaCommit => "quota_commit",
        };
        f.write_str(name)
    }
}

/// Caller-safe description of a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub stage: ExecutionStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    /// Upstream status, for upstream failures only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Upstream response body, for upstream failures only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_body: Option<Value>,
}

impl ExecutionFailure {
    pub fn new(stage: ExecutionStage, error: &ConduitError) -> Self {
        let detail = error.upstream_detail();
        Self {
            kind: error.kind(),
            stage,
            message: error.to_string(),
            timed_out: error.timed_out(),
            upstream_status: detail.map(|(status, _)| status),
            upstream_body: detail.map(|(_, body)| body.clone()),
        }
    }
}

/// Usage metrics of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUsage {
    pub elapsed_ms: u64,
    /// Quota units committed; zero when dispatch never ran.
    pub units: u32,
}

/// Outcome of one execution, regardless of which stage failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub usage: ExecutionUsage,
}

impl ExecutionResult {
    pub fn succeeded(data: Value, usage: ExecutionUsage) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            usage,
        }
    }

    pub fn failed(stage: ExecutionStage, error: &ConduitError, usage: ExecutionUsage) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ExecutionFailure::new(stage, error)),
            usage,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
