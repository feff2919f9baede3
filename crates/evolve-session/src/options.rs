//! Per-call options for `run` and `execute_command`.

/// Options accompanying [`crate::SessionController::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Per-call timeout; falls back to the session default (1 hour) if unset.
    pub timeout_ms: Option<u64>,
    /// Return a handshake response immediately; deliver completion via the
    /// `lifecycle` channel.
    pub background: bool,
    /// Restore from this checkpoint id (or `"latest"`) before running.
    /// Mutually exclusive with a session already bound to a `sandbox_id`.
    pub from_checkpoint: Option<String>,
    /// Label for the checkpoint auto-captured after this run.
    pub checkpoint_comment: Option<String>,
}

/// Options accompanying [`crate::SessionController::execute_command`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Per-call timeout; falls back to the session default (1 hour) if unset.
    pub timeout_ms: Option<u64>,
    /// Return a handshake response immediately; deliver completion via the
    /// `lifecycle` channel.
    pub background: bool,
    /// Working directory for the command; defaults to the session's
    /// configured working directory.
    pub cwd: Option<String>,
    /// Extra environment variables for this command only.
    pub envs: Vec<(String, String)>,
    /// User to run the command as.
    pub user: Option<String>,
}
