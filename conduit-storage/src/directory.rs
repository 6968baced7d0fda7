//! Tenant directory: projects, agents and agent API keys
//!
//! API keys are never stored. Agents carry the hex SHA-256 digest of their
//! key and lookups go through a digest index.

use conduit_core::{Agent, AgentId, ConduitResult, Project, ProjectId, StorageError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex SHA-256 of an API key.
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// On-disk directory layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryDocument {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Default)]
pub struct TenantDirectory {
    projects: DashMap<ProjectId, Project>,
    agents: DashMap<AgentId, Agent>,
    agents_by_key: DashMap<String, AgentId>,
}

impl TenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: DirectoryDocument) -> ConduitResult<Self> {
        let directory = Self::new();
        for project in document.projects {
            directory.insert_project(project);
        }
        for agent in document.agents {
            directory.insert_agent(agent)?;
        }
        Ok(directory)
    }

    pub fn from_json(raw: &str) -> ConduitResult<Self> {
        let document: DirectoryDocument =
            serde_json::from_str(raw).map_err(|e| StorageError::Serialization {
                reason: e.to_string(),
            })?;
        Self::from_document(document)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConduitResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| StorageError::NotFound {
            entity: "Directory".to_string(),
            id: format!("{} ({})", path.display(), e),
        })?;
        Self::from_json(&raw)
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.id, project);
    }

    /// Register an agent. Its project must already exist.
    pub fn insert_agent(&self, agent: Agent) -> ConduitResult<()> {
        if !self.projects.contains_key(&agent.project_id) {
            return Err(StorageError::NotFound {
                entity: "Project".to_string(),
                id: agent.project_id.to_string(),
            }
            .into());
        }
        if let Some(digest) = &agent.api_key_sha256 {
            self.agents_by_key
                .insert(digest.to_ascii_lowercase(), agent.id);
        }
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    /// Register an agent together with a plaintext key; only its digest is kept.
    pub fn insert_agent_with_key(&self, mut agent: Agent, api_key: &str) -> ConduitResult<()> {
        agent.api_key_sha256 = Some(hash_api_key(api_key));
        self.insert_agent(agent)
    }

    pub fn project(&self, id: ProjectId) -> Option<Project> {
        self.projects.get(&id).map(|p| p.value().clone())
    }

    pub fn agent(&self, id: AgentId) -> Option<Agent> {
        self.agents.get(&id).map(|a| a.value().clone())
    }

    pub fn agent_by_api_key(&self, api_key: &str) -> Option<Agent> {
        let agent_id = *self.agents_by_key.get(&hash_api_key(api_key))?;
        self.agent(agent_id)
    }

    pub fn agents_for_project(&self, project_id: ProjectId) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.project_id == project_id)
            .map(|a| a.value().clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}
