//! The `SandboxProvider` capability: create, resume, pause, kill a remote
//! sandbox; execute commands; transfer files; snapshot the filesystem.

use async_trait::async_trait;
use evolve_core::FileMap;
use evolve_error::Result;

/// A live handle to a booted sandbox, returned by
/// [`SandboxProvider::boot`]/[`SandboxProvider::resume`].
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    /// Provider-assigned sandbox id.
    pub sandbox_id: String,
}

/// The result of executing a shell command inside a sandbox.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// A remote, ephemeral execution environment.
///
/// Implementations own the wire protocol to a specific sandbox vendor; the
/// orchestrator only ever interacts through this trait.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Boot a fresh sandbox and return a handle to it.
    async fn boot(&self) -> Result<SandboxHandle>;

    /// Attach to a previously booted sandbox by id.
    async fn resume(&self, sandbox_id: &str) -> Result<SandboxHandle>;

    /// Suspend a sandbox without destroying it.
    async fn pause(&self, sandbox_id: &str) -> Result<()>;

    /// Terminate a sandbox. Idempotent: killing an already-killed sandbox
    /// returns `Ok(())`.
    async fn kill(&self, sandbox_id: &str) -> Result<()>;

    /// Execute a shell command inside the sandbox.
    async fn execute_command(
        &self,
        sandbox_id: &str,
        command: &str,
        cwd: Option<&str>,
        envs: Option<&[(String, String)]>,
        user: Option<&str>,
        timeout_ms: u64,
    ) -> Result<CommandOutcome>;

    /// Signal the currently running process in the sandbox to stop.
    ///
    /// Returns `true` if a process was actually running and signalled.
    async fn interrupt(&self, sandbox_id: &str) -> Result<bool>;

    /// Upload a set of files into the sandbox under the given root.
    async fn upload_files(&self, sandbox_id: &str, root: &str, files: &FileMap) -> Result<()>;

    /// Download every file under `root` modified at or after `since_ms`
    /// (Unix epoch milliseconds). Used by `get_output_files` to scope
    /// results to the current run.
    async fn download_files_since(&self, sandbox_id: &str, root: &str, since_ms: i64) -> Result<FileMap>;

    /// Download every file under `root`, with no time filter.
    async fn download_dir(&self, sandbox_id: &str, root: &str) -> Result<FileMap>;

    /// Read a single file's contents.
    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<FileMap>;

    /// Snapshot the sandbox filesystem into a gzip-compressed tar archive.
    async fn snapshot(&self, sandbox_id: &str) -> Result<Vec<u8>>;

    /// Restore a sandbox's filesystem from a previously captured archive.
    async fn restore(&self, sandbox_id: &str, archive: &[u8]) -> Result<()>;

    /// Resolve a host URL for a port exposed by the sandbox.
    async fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String>;
}
