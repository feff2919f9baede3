//! The `AgentDriver` capability: launch a coding-agent process inside a
//! sandbox and stream its events.

use async_trait::async_trait;
use evolve_core::AgentType;
use evolve_error::Result;
use tokio::sync::mpsc;

/// A single streamed content update from the agent, mirroring an
/// ACP-style `sessionUpdate` payload.
///
/// Modelled as a tagged union rather than an untyped JSON blob (Design
/// Notes: "duck-typed event payloads").
#[derive(Debug, Clone)]
pub enum ContentEvent {
    /// A chunk of the agent's visible response.
    AgentMessageChunk {
        /// The chunk of text.
        text: String,
    },
    /// A chunk of the agent's internal reasoning, if the driver surfaces it.
    AgentThoughtChunk {
        /// The chunk of text.
        text: String,
    },
    /// The agent invoked a tool.
    ToolCall {
        /// Tool name.
        name: String,
        /// Tool call id, used to correlate with a later `ToolCallUpdate`.
        id: String,
    },
    /// A previously reported tool call's status changed.
    ToolCallUpdate {
        /// The tool call id this update concerns.
        id: String,
        /// Human-readable status.
        status: String,
    },
    /// The agent reported a multi-step plan.
    Plan {
        /// Plan step descriptions, in order.
        steps: Vec<String>,
    },
}

/// Which kind of driver-level event occurred; used to distinguish
/// stdout/stderr passthrough from structured content.
#[derive(Debug, Clone)]
pub enum AgentEventKind {
    /// Raw stdout bytes from the agent process.
    Stdout(String),
    /// Raw stderr bytes from the agent process.
    Stderr(String),
    /// A structured content update.
    Content(ContentEvent),
}

/// One event emitted by a running agent process.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    /// The kind of event.
    pub kind: AgentEventKind,
}

/// Launches and drives a specific coding-agent CLI inside a sandbox.
///
/// Per-family quirks (system prompt filename, MCP config format, OAuth
/// eligibility) live entirely behind this trait; callers only ever see
/// [`evolve_core::AgentType`] as an opaque selector.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// The agent family this driver implements.
    fn agent_type(&self) -> AgentType;

    /// Start the agent process with the given prompt and stream its events.
    ///
    /// Returns once the agent process exits; events are pushed to
    /// `events_tx` as they occur.
    async fn run(
        &self,
        sandbox_id: &str,
        prompt: &str,
        timeout_ms: u64,
        events_tx: mpsc::Sender<AgentEvent>,
    ) -> Result<DriverOutcome>;

    /// Signal the running agent process to stop.
    async fn interrupt(&self, sandbox_id: &str) -> Result<bool>;
}

/// The terminal outcome of one `AgentDriver::run` call.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    /// Process exit code.
    pub exit_code: i32,
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
}
