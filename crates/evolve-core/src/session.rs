//! Session-level state: sandbox/agent lifecycle, runs, checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sandbox-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// No sandbox has been booted yet, or it has not been resumed.
    Stopped,
    /// The sandbox is running and able to accept commands.
    Ready,
    /// The sandbox is running but suspended (billing-paused).
    Paused,
    /// The sandbox has been terminated; terminal state.
    Killed,
}

/// Agent-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// No run or command is in flight.
    Idle,
    /// A run or command is currently executing.
    Running,
    /// The previously running process was interrupted.
    Interrupted,
}

/// The closed set of reasons a [`LifecycleEvent`] was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleReason {
    /// Sandbox creation requested.
    SandboxBoot,
    /// Sandbox is ready to accept commands.
    SandboxReady,
    /// An existing sandbox id was attached to.
    SandboxConnected,
    /// Sandbox was paused.
    SandboxPause,
    /// Sandbox was resumed from pause.
    SandboxResume,
    /// Sandbox was killed.
    SandboxKilled,
    /// A foreground run started.
    RunStart,
    /// A foreground run completed successfully.
    RunComplete,
    /// A foreground run failed.
    RunFailed,
    /// A foreground run was interrupted.
    RunInterrupted,
    /// A background run completed successfully.
    RunBackgroundComplete,
    /// A background run failed.
    RunBackgroundFailed,
    /// A shell command started.
    CommandStart,
    /// A shell command completed successfully.
    CommandComplete,
    /// A shell command failed.
    CommandFailed,
    /// A shell command was interrupted.
    CommandInterrupted,
    /// A background shell command completed successfully.
    CommandBackgroundComplete,
    /// A background shell command failed.
    CommandBackgroundFailed,
}

/// A lifecycle notification delivered on the `lifecycle` event channel.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LifecycleEvent {
    /// The sandbox this event concerns, once one has been assigned.
    pub sandbox_id: Option<String>,
    /// Sandbox state at the time of the event.
    pub sandbox: SandboxState,
    /// Agent state at the time of the event.
    pub agent: AgentState,
    /// Why the event was emitted.
    pub reason: LifecycleReason,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

/// A consistent, atomically observed snapshot of session state.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SessionStatus {
    /// The sandbox this session is bound to, once one has been assigned.
    pub sandbox_id: Option<String>,
    /// Current sandbox state.
    pub sandbox: SandboxState,
    /// Current agent state.
    pub agent: AgentState,
    /// Identifier of the currently running process, if any.
    pub active_process_id: Option<String>,
    /// Whether this session has completed at least one run.
    pub has_run: bool,
    /// When this snapshot was produced.
    pub timestamp: DateTime<Utc>,
}

/// The result of `run()` or `execute_command()`.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AgentResponse {
    /// Sandbox that executed the run or command.
    pub sandbox_id: String,
    /// Present for `run()`; always `None` for `execute_command()`, since
    /// shell commands are not billable runs.
    pub run_id: Option<Uuid>,
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// The checkpoint auto-captured after a successful run, if storage was
    /// configured.
    pub checkpoint: Option<CheckpointInfo>,
}

/// A transient in-flight or completed run record.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Run {
    /// Unique id for this run.
    pub run_id: Uuid,
    /// The prompt given to the agent.
    pub prompt: String,
    /// When the run was started.
    pub started_at: DateTime<Utc>,
    /// When the run completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Process exit code, once known.
    pub exit_code: Option<i32>,
    /// Captured standard output so far.
    pub stdout: String,
    /// Captured standard error so far.
    pub stderr: String,
    /// The checkpoint captured after this run, if any.
    pub checkpoint: Option<CheckpointInfo>,
}

/// Persisted metadata describing one checkpoint archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CheckpointInfo {
    /// Store-assigned unique id for this checkpoint.
    pub id: String,
    /// Hex-encoded SHA-256 of the archive bytes.
    pub hash: String,
    /// The session tag in effect when this checkpoint was captured.
    pub tag: String,
    /// When the checkpoint was captured.
    pub timestamp: DateTime<Utc>,
    /// Archive size in bytes.
    pub size_bytes: u64,
    /// Agent family that produced this checkpoint.
    pub agent_type: crate::agent::AgentType,
    /// Model identifier in use at capture time, if known.
    pub model: Option<String>,
    /// Workspace mode at capture time.
    pub workspace_mode: crate::agent::WorkspaceMode,
    /// Id of the checkpoint this one was derived from, if any: either the
    /// session's previous checkpoint, or the checkpoint a restore started
    /// from.
    pub parent_id: Option<String>,
    /// Free-text caller-supplied note.
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_command_response_has_no_run_id() {
        let resp = AgentResponse {
            sandbox_id: "sbx-1".into(),
            run_id: None,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            checkpoint: None,
        };
        assert!(resp.run_id.is_none());
    }
}
