//! Tenant-side entities: Projects, Agents, quotas and LinkedAccounts

use crate::identity::{AgentId, EntityIdType, LinkedAccountId, ProjectId, Timestamp};
use crate::security::{SecurityCredentials, SecuritySchemeKind};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// QUOTA POLICY
// ============================================================================

/// Budget reset period. Boundaries are calendar boundaries in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPeriod {
    Daily,
    Monthly,
}

impl QuotaPeriod {
    /// Monotonic index of the period containing `at`.
    pub fn index(&self, at: Timestamp) -> u32 {
        match self {
            QuotaPeriod::Daily => at.timestamp().div_euclid(86_400).max(0) as u32,
            QuotaPeriod::Monthly => {
                let months = i64::from(at.year()) * 12 + i64::from(at.month0());
                months.max(0) as u32
            }
        }
    }

    /// Start of the period following the one containing `at`.
    pub fn next_boundary(&self, at: Timestamp) -> Timestamp {
        let date = at.date_naive();
        let next = match self {
            QuotaPeriod::Daily => date.succ_opt(),
            QuotaPeriod::Monthly => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        };
        next.and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or_else(|| at + ChronoDuration::days(1))
    }
}

/// Call-count budget of a Project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Maximum units per period.
    pub limit: u32,
    pub period: QuotaPeriod,
}

// ============================================================================
// PROJECT
// ============================================================================

/// A Project's configuration of one App.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfiguration {
    pub app_name: String,
    pub security_scheme: SecuritySchemeKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub all_functions_enabled: bool,
    /// Consulted only when `all_functions_enabled` is false.
    #[serde(default)]
    pub enabled_functions: BTreeSet<String>,
}

impl AppConfiguration {
    pub fn new(app_name: impl Into<String>, security_scheme: SecuritySchemeKind) -> Self {
        Self {
            app_name: app_name.into(),
            security_scheme,
            enabled: true,
            all_functions_enabled: true,
            enabled_functions: BTreeSet::new(),
        }
    }

    pub fn is_function_enabled(&self, function_name: &str) -> bool {
        self.all_functions_enabled || self.enabled_functions.contains(function_name)
    }
}

fn default_true() -> bool {
    true
}

/// Tenant boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// `None` means unmetered.
    #[serde(default)]
    pub quota: Option<QuotaPolicy>,
    #[serde(default)]
    pub app_configurations: Vec<AppConfiguration>,
}

impl Project {
    pub fn app_configuration(&self, app_name: &str) -> Option<&AppConfiguration> {
        self.app_configurations
            .iter()
            .find(|c| c.app_name == app_name)
    }
}

// ============================================================================
// AGENT
// ============================================================================

/// A permissioned actor within a Project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub allowed_apps: BTreeSet<String>,
    /// Function name -> natural-language constraint.
    #[serde(default)]
    pub custom_instructions: BTreeMap<String, String>,
    /// Hex SHA-256 of the agent's API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_sha256: Option<String>,
}

impl Agent {
    pub fn can_use_app(&self, app_name: &str) -> bool {
        self.allowed_apps.contains(app_name)
    }

    pub fn instruction_for(&self, function_name: &str) -> Option<&str> {
        self.custom_instructions
            .get(function_name)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

// ============================================================================
// LINKED ACCOUNT
// ============================================================================

/// Natural key of a LinkedAccount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkedAccountKey {
    pub project_id: ProjectId,
    pub app_name: String,
    pub owner_id: String,
}

impl LinkedAccountKey {
    pub fn new(project_id: ProjectId, app_name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            project_id,
            app_name: app_name.into(),
            owner_id: owner_id.into(),
        }
    }
}

impl std::fmt::Display for LinkedAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "project={}, app={}, owner={}",
            self.project_id, self.app_name, self.owner_id
        )
    }
}

/// Stored credential binding of Project + App + owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub id: LinkedAccountId,
    pub project_id: ProjectId,
    pub app_name: String,
    pub owner_id: String,
    pub security_scheme: SecuritySchemeKind,
    /// `None` means "use the App's default credentials".
    pub credentials: Option<SecurityCredentials>,
    pub enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
}

impl LinkedAccount {
    /// A fresh, enabled account.
    pub fn new(
        key: LinkedAccountKey,
        security_scheme: SecuritySchemeKind,
        credentials: Option<SecurityCredentials>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: LinkedAccountId::now_v7(),
            project_id: key.project_id,
            app_name: key.app_name,
            owner_id: key.owner_id,
            security_scheme,
            credentials,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }

    pub fn key(&self) -> LinkedAccountKey {
        LinkedAccountKey::new(self.project_id, self.app_name.clone(), self.owner_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_daily_period_boundaries() {
        let t = at("2024-03-10T23:59:59Z");
        assert_eq!(QuotaPeriod::Daily.next_boundary(t), at("2024-03-11T00:00:00Z"));
        assert_ne!(
            QuotaPeriod::Daily.index(t),
            QuotaPeriod::Daily.index(at("2024-03-11T00:00:00Z"))
        );
    }

    #[test]
    fn test_monthly_period_rolls_over_year() {
        let t = at("2024-12-31T12:00:00Z");
        assert_eq!(QuotaPeriod::Monthly.next_boundary(t), at("2025-01-01T00:00:00Z"));
        assert_eq!(
            QuotaPeriod::Monthly.index(at("2024-12-01T00:00:00Z")),
            QuotaPeriod::Monthly.index(t)
        );
        assert_eq!(
            QuotaPeriod::Monthly.index(at("2025-01-01T00:00:00Z")),
            QuotaPeriod::Monthly.index(t) + 1
        );
    }

    #[test]
    fn test_app_configuration_function_selection() {
        let mut config = AppConfiguration::new("GITHUB", SecuritySchemeKind::OAuth2);
        assert!(config.is_function_enabled("GITHUB__ANYTHING"));
        config.all_functions_enabled = false;
        config.enabled_functions.insert("GITHUB__LIST_REPOS".into());
        assert!(config.is_function_enabled("GITHUB__LIST_REPOS"));
        assert!(!config.is_function_enabled("GITHUB__DELETE_REPO"));
    }

    #[test]
    fn test_agent_blank_instruction_is_ignored() {
        let mut agent = Agent {
            id: AgentId::nil(),
            project_id: ProjectId::nil(),
            name: "a".into(),
            allowed_apps: BTreeSet::new(),
            custom_instructions: BTreeMap::new(),
            api_key_sha256: None,
        };
        agent.custom_instructions.insert("X__Y".into(), "   ".into());
        assert!(agent.instruction_for("X__Y").is_none());
    }
}
