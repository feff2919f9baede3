//! The closed set of agent families and the per-session options that are
//! opaque to everything above the capability layer.

use serde::{Deserialize, Serialize};

/// A supported coding-agent CLI family.
///
/// The orchestrator treats this as an opaque tag: per-family quirks (system
/// prompt filename, MCP config path/format, OAuth eligibility) live entirely
/// inside the `AgentDriver` implementation that handles a given variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// OpenAI Codex CLI.
    Codex,
    /// Anthropic Claude Code.
    Claude,
    /// Google Gemini CLI.
    Gemini,
    /// Alibaba Qwen Code.
    Qwen,
    /// Moonshot Kimi CLI.
    Kimi,
    /// OpenCode.
    Opencode,
}

impl AgentType {
    /// The filename the driver writes the session's system prompt to,
    /// relative to the sandbox working directory.
    pub fn system_prompt_filename(self) -> &'static str {
        match self {
            AgentType::Codex => "AGENTS.md",
            AgentType::Claude => "CLAUDE.md",
            AgentType::Gemini => "GEMINI.md",
            AgentType::Qwen => "QWEN.md",
            AgentType::Kimi => "AGENTS.md",
            AgentType::Opencode => "AGENTS.md",
        }
    }

    /// Whether this family accepts an OAuth token in place of an API key.
    pub fn supports_oauth(self) -> bool {
        matches!(self, AgentType::Claude | AgentType::Codex)
    }

    /// Whether this family's MCP transport is restricted to STDIO (as
    /// opposed to also accepting HTTP-remote servers).
    pub fn mcp_stdio_only(self) -> bool {
        matches!(self, AgentType::Qwen)
    }
}

/// Where the agent is expected to place its working files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// General knowledge-work sandbox: `output/`, `context/`, `scripts/`, `temp/`.
    Knowledge,
    /// Software-engineering sandbox: adds `repo/` and a SWE-oriented prompt.
    Swe,
}

/// Requested reasoning effort, forwarded to agent drivers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Low effort / fast response.
    Low,
    /// Default effort.
    Medium,
    /// High effort.
    High,
    /// Maximum effort.
    Xhigh,
}

/// Schema validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject type mismatches outright.
    Strict,
    /// Coerce primitives (string → number, string → date, ...) where safe.
    Loose,
}

impl Default for ValidationMode {
    fn default() -> Self {
        ValidationMode::Loose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_prompt_filenames_are_distinct_by_family() {
        assert_eq!(AgentType::Claude.system_prompt_filename(), "CLAUDE.md");
        assert_eq!(AgentType::Gemini.system_prompt_filename(), "GEMINI.md");
        assert_eq!(AgentType::Qwen.system_prompt_filename(), "QWEN.md");
    }

    #[test]
    fn only_claude_and_codex_support_oauth() {
        assert!(AgentType::Claude.supports_oauth());
        assert!(AgentType::Codex.supports_oauth());
        assert!(!AgentType::Gemini.supports_oauth());
        assert!(!AgentType::Kimi.supports_oauth());
    }

    #[test]
    fn validation_mode_default_is_loose() {
        assert_eq!(ValidationMode::default(), ValidationMode::Loose);
    }
}
