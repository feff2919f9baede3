//! In-memory `SandboxProvider`/`AgentDriver` test doubles.
//!
//! These back the integration tests for `evolve-session`, `evolve-swarm`,
//! and `evolve-pipeline`; no real sandbox vendor or agent CLI is ever
//! spawned. No real SDK is called.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use evolve_capability::driver::{AgentDriver, AgentEvent, AgentEventKind, ContentEvent, DriverOutcome};
use evolve_capability::sandbox::{CommandOutcome, SandboxHandle, SandboxProvider};
use evolve_core::{AgentType, FileMap};
use evolve_error::{EvolveError, Result};
use tokio::sync::mpsc;

/// Scripted result for one `MockAgentDriver::run` call.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Exit code to return.
    pub exit_code: i32,
    /// Stdout to return.
    pub stdout: String,
    /// `output/` files to materialize as if the agent wrote them.
    pub output_files: FileMap,
}

impl ScriptedRun {
    /// A script for a clean, successful run producing no output files.
    pub fn ok(stdout: impl Into<String>) -> Self {
        ScriptedRun { exit_code: 0, stdout: stdout.into(), output_files: FileMap::new() }
    }

    /// A script for a failing run.
    pub fn failing(exit_code: i32, stdout: impl Into<String>) -> Self {
        ScriptedRun { exit_code, stdout: stdout.into(), output_files: FileMap::new() }
    }
}

/// A sandbox provider whose filesystem lives entirely in memory.
///
/// Each sandbox keeps a flat map of absolute path to content. `boot`
/// allocates a fresh id; `resume` fails with `SandboxNotFound` unless the
/// id was previously booted (or seeded via [`MockSandboxProvider::seed`]).
#[derive(Debug, Default)]
pub struct MockSandboxProvider {
    sandboxes: Mutex<BTreeMap<String, SandboxState>>,
    next_id: Mutex<u64>,
}

#[derive(Debug, Default, Clone)]
struct SandboxState {
    killed: bool,
    paused: bool,
    files: FileMap,
}

impl MockSandboxProvider {
    /// Construct an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a sandbox id with an archive-restored file set, as if it
    /// had already been booted. Used by checkpoint-restore tests.
    pub fn seed(&self, sandbox_id: impl Into<String>, files: FileMap) {
        self.sandboxes
            .lock()
            .unwrap()
            .insert(sandbox_id.into(), SandboxState { files, ..Default::default() });
    }

    /// Inspect the current in-memory files for a sandbox, for test
    /// assertions.
    pub fn files_of(&self, sandbox_id: &str) -> FileMap {
        self.sandboxes.lock().unwrap().get(sandbox_id).map(|s| s.files.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    async fn boot(&self) -> Result<SandboxHandle> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let sandbox_id = format!("mock-sbx-{}", *next);
        self.sandboxes.lock().unwrap().insert(sandbox_id.clone(), SandboxState::default());
        Ok(SandboxHandle { sandbox_id })
    }

    async fn resume(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let sandboxes = self.sandboxes.lock().unwrap();
        match sandboxes.get(sandbox_id) {
            Some(state) if !state.killed => Ok(SandboxHandle { sandbox_id: sandbox_id.to_string() }),
            _ => Err(EvolveError::SandboxNotFound(sandbox_id.to_string())),
        }
    }

    async fn pause(&self, sandbox_id: &str) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get_mut(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        state.paused = true;
        Ok(())
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        if let Some(state) = sandboxes.get_mut(sandbox_id) {
            // Idempotent: killing an already-killed sandbox is a no-op success.
            state.killed = true;
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        sandbox_id: &str,
        command: &str,
        _cwd: Option<&str>,
        _envs: Option<&[(String, String)]>,
        _user: Option<&str>,
        _timeout_ms: u64,
    ) -> Result<CommandOutcome> {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.get(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        Ok(CommandOutcome { exit_code: 0, stdout: format!("ran: {command}"), stderr: String::new() })
    }

    async fn interrupt(&self, sandbox_id: &str) -> Result<bool> {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.get(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        Ok(true)
    }

    async fn upload_files(&self, sandbox_id: &str, root: &str, files: &FileMap) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get_mut(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        for (path, content) in files {
            state.files.insert(format!("{root}/{path}"), content.clone());
        }
        Ok(())
    }

    async fn download_files_since(&self, sandbox_id: &str, root: &str, _since_ms: i64) -> Result<FileMap> {
        self.download_dir(sandbox_id, root).await
    }

    async fn download_dir(&self, sandbox_id: &str, root: &str) -> Result<FileMap> {
        let sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        let prefix = format!("{root}/");
        Ok(state
            .files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, content)| (path[prefix.len()..].to_string(), content.clone()))
            .collect())
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<FileMap> {
        let sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        let mut out = FileMap::new();
        if let Some(content) = state.files.get(path) {
            out.insert(path.to_string(), content.clone());
        }
        Ok(out)
    }

    async fn snapshot(&self, sandbox_id: &str) -> Result<Vec<u8>> {
        let sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        // Not a real tar/gzip: a deterministic serialization good enough for
        // in-memory round-trip tests via `restore`.
        let mut bytes = Vec::new();
        for (path, content) in &state.files {
            bytes.extend_from_slice(path.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(content.as_text_lossy().as_bytes());
            bytes.push(0);
        }
        Ok(bytes)
    }

    async fn restore(&self, sandbox_id: &str, archive: &[u8]) -> Result<()> {
        let mut files = FileMap::new();
        let mut parts = archive.split(|b| *b == 0);
        while let (Some(path), Some(content)) = (parts.next(), parts.next()) {
            if path.is_empty() {
                continue;
            }
            files.insert(
                String::from_utf8_lossy(path).into_owned(),
                evolve_core::files::FileContent::text(String::from_utf8_lossy(content).into_owned()),
            );
        }
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let state = sandboxes.get_mut(sandbox_id).ok_or_else(|| EvolveError::SandboxNotFound(sandbox_id.to_string()))?;
        state.files = files;
        Ok(())
    }

    async fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String> {
        Ok(format!("https://{sandbox_id}-{port}.mock.evolve.local"))
    }
}

/// An agent driver that replays a pre-scripted sequence of runs instead of
/// invoking any real agent CLI.
pub struct MockAgentDriver {
    agent_type: AgentType,
    scripts: Mutex<Vec<ScriptedRun>>,
    provider: Option<Arc<dyn SandboxProvider>>,
}

impl MockAgentDriver {
    /// Build a driver for `agent_type` that replays `scripts` in order, one
    /// per `run()` call. Once exhausted, every further call repeats the
    /// last script. A script's `output_files` are not materialized unless
    /// the driver also has a provider (see [`MockAgentDriver::with_provider`]).
    pub fn new(agent_type: AgentType, scripts: Vec<ScriptedRun>) -> Self {
        MockAgentDriver { agent_type, scripts: Mutex::new(scripts), provider: None }
    }

    /// Like [`MockAgentDriver::new`], but writes each script's
    /// `output_files` into `provider`'s `output/` directory as part of
    /// `run()`, the way a real agent process writes files into its sandbox
    /// as a side effect of running.
    pub fn with_provider(agent_type: AgentType, scripts: Vec<ScriptedRun>, provider: Arc<dyn SandboxProvider>) -> Self {
        MockAgentDriver { agent_type, scripts: Mutex::new(scripts), provider: Some(provider) }
    }

    /// A driver that always succeeds with the given stdout and no output
    /// files.
    pub fn always_ok(agent_type: AgentType, stdout: impl Into<String>) -> Self {
        Self::new(agent_type, vec![ScriptedRun::ok(stdout)])
    }
}

#[async_trait]
impl AgentDriver for MockAgentDriver {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn run(
        &self,
        sandbox_id: &str,
        prompt: &str,
        _timeout_ms: u64,
        events_tx: mpsc::Sender<AgentEvent>,
    ) -> Result<DriverOutcome> {
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.remove(0)
            } else {
                scripts.first().cloned().unwrap_or_else(|| ScriptedRun::ok(""))
            }
        };

        let _ = events_tx
            .send(AgentEvent {
                kind: AgentEventKind::Content(ContentEvent::AgentMessageChunk {
                    text: format!("replying to: {prompt}"),
                }),
            })
            .await;
        let _ = events_tx.send(AgentEvent { kind: AgentEventKind::Stdout(script.stdout.clone()) }).await;

        if !script.output_files.is_empty() {
            if let Some(provider) = &self.provider {
                provider.upload_files(sandbox_id, "output", &script.output_files).await?;
            }
        }

        Ok(DriverOutcome { exit_code: script.exit_code, stdout: script.stdout, stderr: String::new() })
    }

    async fn interrupt(&self, _sandbox_id: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boot_then_resume_succeeds() {
        let provider = MockSandboxProvider::new();
        let handle = provider.boot().await.unwrap();
        let resumed = provider.resume(&handle.sandbox_id).await.unwrap();
        assert_eq!(resumed.sandbox_id, handle.sandbox_id);
    }

    #[tokio::test]
    async fn resume_after_kill_fails_with_sandbox_not_found() {
        let provider = MockSandboxProvider::new();
        let handle = provider.boot().await.unwrap();
        provider.kill(&handle.sandbox_id).await.unwrap();
        let err = provider.resume(&handle.sandbox_id).await.unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::SandboxNotFound);
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let provider = MockSandboxProvider::new();
        let handle = provider.boot().await.unwrap();
        provider.kill(&handle.sandbox_id).await.unwrap();
        // Second kill must not error.
        provider.kill(&handle.sandbox_id).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips_files() {
        let provider = MockSandboxProvider::new();
        let handle = provider.boot().await.unwrap();
        let mut files = FileMap::new();
        files.insert("hello.txt".into(), evolve_core::files::FileContent::text("Hi"));
        provider.upload_files(&handle.sandbox_id, "output", &files).await.unwrap();

        let archive = provider.snapshot(&handle.sandbox_id).await.unwrap();

        let handle2 = provider.boot().await.unwrap();
        provider.restore(&handle2.sandbox_id, &archive).await.unwrap();
        let restored = provider.download_dir(&handle2.sandbox_id, "output").await.unwrap();
        assert_eq!(restored.get("hello.txt").unwrap().as_text_lossy(), "Hi");
    }

    #[tokio::test]
    async fn driver_with_provider_materializes_output_files() {
        let provider = Arc::new(MockSandboxProvider::new());
        let handle = provider.boot().await.unwrap();
        let mut output_files = FileMap::new();
        output_files.insert("result.json".into(), evolve_core::files::FileContent::text(r#"{"ok":true}"#));
        let driver = MockAgentDriver::with_provider(
            AgentType::Claude,
            vec![ScriptedRun { exit_code: 0, stdout: "done".into(), output_files }],
            provider.clone(),
        );

        let (tx, _rx) = mpsc::channel(8);
        driver.run(&handle.sandbox_id, "go", 1000, tx).await.unwrap();

        let files = provider.download_dir(&handle.sandbox_id, "output").await.unwrap();
        assert_eq!(files.get("result.json").unwrap().as_text_lossy(), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn mock_driver_replays_scripted_runs_in_order() {
        let driver = MockAgentDriver::new(
            AgentType::Claude,
            vec![ScriptedRun::failing(1, "first"), ScriptedRun::ok("second")],
        );
        let (tx, _rx) = mpsc::channel(8);
        let first = driver.run("sbx", "go", 1000, tx.clone()).await.unwrap();
        assert_eq!(first.exit_code, 1);
        let second = driver.run("sbx", "go", 1000, tx).await.unwrap();
        assert_eq!(second.exit_code, 0);
    }
}
