#![warn(missing_docs)]
//! Prepares the directory layout, system prompt, and MCP configuration a
//! sandbox needs before an agent is first launched in it.

pub mod mcp;
pub mod prompt;

use evolve_core::{AgentType, FileMap, WorkspaceMode};
pub use mcp::{McpServer, McpTransport};

/// The set of files to materialize in a fresh sandbox before the agent's
/// first `run()`, derived from a [`WorkspaceMode`] and agent selection.
///
/// `boot()` on the session controller uploads this via
/// `SandboxProvider::upload_files`; this crate only computes the contents.
pub struct WorkspacePlan {
    /// Directories to create, relative to the working directory.
    pub directories: Vec<&'static str>,
    /// Files to write before first launch (system prompt, MCP config).
    pub files: FileMap,
}

/// Build the workspace plan for a fresh session.
pub fn plan(
    mode: WorkspaceMode,
    agent_type: AgentType,
    caller_system_prompt: Option<&str>,
    mcp_servers: &[McpServer],
) -> WorkspacePlan {
    let mut directories = vec!["output", "context", "scripts", "temp"];
    if mode == WorkspaceMode::Swe {
        directories.push("repo");
    }

    let mut files = FileMap::new();

    let prompt_text = prompt::render(mode, caller_system_prompt);
    files.insert(
        agent_type.system_prompt_filename().to_string(),
        evolve_core::files::FileContent::text(prompt_text),
    );

    if !mcp_servers.is_empty() {
        let (path, contents) = mcp::render(agent_type, mcp_servers);
        files.insert(path, evolve_core::files::FileContent::text(contents));
    }

    WorkspacePlan { directories, files }
}
