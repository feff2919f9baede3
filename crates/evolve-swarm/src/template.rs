//! The cloneable subset of [`evolve_session::SessionConfig`] shared by
//! every ephemeral unit a swarm schedules.
//!
//! `SessionConfig` itself cannot be cloned (it owns a
//! `Box<dyn SchemaDescriptor>`), and a swarm needs a fresh session per
//! unit rather than one long-lived session. `SessionTemplate` holds only
//! the fields that are genuinely shared across every unit, and builds a
//! fresh `SessionConfig` on demand; schema validation happens separately
//! in this crate's operators, against the unit's raw output files, so the
//! per-unit `SessionConfig` never carries a schema at all.

use std::path::PathBuf;
use std::sync::Arc;

use evolve_checkpoint::FilesystemCheckpointStore;
use evolve_core::{AgentType, FileMap, WorkspaceMode};
use evolve_cost::CostClient;
use evolve_session::credential::{CredentialProvider, ExplicitCredentials, NoCredentials};
use evolve_session::SessionConfig;
use evolve_workspace::McpServer;

/// Shared configuration for every session a [`crate::Swarm`] boots.
pub struct SessionTemplate {
    /// Agent family used when an operator call does not override it.
    pub default_agent: AgentType,
    /// Working directory inside each ephemeral sandbox.
    pub working_directory: String,
    /// Knowledge-work vs. software-engineering workspace layout.
    pub workspace_mode: WorkspaceMode,
    /// System prompt shared by every unit, before any skills line is
    /// appended.
    pub system_prompt: Option<String>,
    /// MCP servers materialized in every unit's workspace.
    pub mcp_servers: Vec<McpServer>,
    /// Session tag prefix for every unit.
    pub session_tag_prefix: Option<String>,
    /// Model identifier recorded on auto-captured checkpoints.
    pub model: Option<String>,
    /// Checkpoint store shared by every unit, if checkpointing is enabled.
    pub storage: Option<Arc<FilesystemCheckpointStore>>,
    /// Cost accounting client shared by every unit, if configured.
    pub cost_client: Option<Arc<dyn CostClient>>,
    /// Observability log directory shared by every unit, if enabled.
    pub observability_dir: Option<PathBuf>,
    /// Credentials explicitly supplied by the caller.
    pub credentials: ExplicitCredentials,
    /// Environment-variable credential fallback strategy.
    pub credential_env: Arc<dyn CredentialProvider>,
}

impl Default for SessionTemplate {
    fn default() -> Self {
        SessionTemplate {
            default_agent: AgentType::Claude,
            working_directory: "/home/user/workspace".to_string(),
            workspace_mode: WorkspaceMode::Knowledge,
            system_prompt: None,
            mcp_servers: Vec::new(),
            session_tag_prefix: None,
            model: None,
            storage: None,
            cost_client: None,
            observability_dir: None,
            credentials: ExplicitCredentials::default(),
            credential_env: Arc::new(NoCredentials),
        }
    }
}

impl SessionTemplate {
    /// Build a fresh [`SessionConfig`] for one unit: `context` is the
    /// per-unit input, `agent_override` replaces `default_agent` when
    /// set, and `skills` (already priority-resolved) is appended to the
    /// system prompt as a tooling instruction — skills have no dedicated
    /// wire representation, so they are propagated as prompt text,
    /// matching the tooling-layer instruction framing they're given.
    pub fn build_config(&self, context: FileMap, agent_override: Option<AgentType>, skills: &[String]) -> SessionConfig {
        let system_prompt = match (&self.system_prompt, skills.is_empty()) {
            (base, true) => base.clone(),
            (Some(base), false) => Some(format!("{base}\n\nEnabled skills: {}", skills.join(", "))),
            (None, false) => Some(format!("Enabled skills: {}", skills.join(", "))),
        };

        SessionConfig {
            agent_type: agent_override.unwrap_or(self.default_agent),
            working_directory: self.working_directory.clone(),
            workspace_mode: self.workspace_mode,
            system_prompt,
            context,
            files: FileMap::new(),
            mcp_servers: self.mcp_servers.clone(),
            sandbox_id: None,
            session_tag_prefix: self.session_tag_prefix.clone(),
            schema: None,
            schema_mode: evolve_core::ValidationMode::default(),
            model: self.model.clone(),
            storage: self.storage.clone(),
            cost_client: self.cost_client.clone(),
            observability_dir: self.observability_dir.clone(),
            credentials: self.credentials.clone(),
            credential_env: Arc::clone(&self.credential_env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skills_are_appended_to_the_system_prompt() {
        let template = SessionTemplate { system_prompt: Some("be helpful".into()), ..Default::default() };
        let config = template.build_config(FileMap::new(), None, &["pdf".to_string()]);
        assert!(config.system_prompt.unwrap().contains("Enabled skills: pdf"));
    }

    #[test]
    fn no_skills_leaves_system_prompt_untouched() {
        let template = SessionTemplate { system_prompt: Some("be helpful".into()), ..Default::default() };
        let config = template.build_config(FileMap::new(), None, &[]);
        assert_eq!(config.system_prompt.as_deref(), Some("be helpful"));
    }

    #[test]
    fn agent_override_takes_priority_over_default() {
        let template = SessionTemplate { default_agent: AgentType::Claude, ..Default::default() };
        let config = template.build_config(FileMap::new(), Some(AgentType::Gemini), &[]);
        assert_eq!(config.agent_type, AgentType::Gemini);
    }
}
