//! Append-only `<session_tag>.jsonl` observability log.

use std::path::{Path, PathBuf};

use evolve_core::LifecycleEvent;
use evolve_error::Result;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// An append-only log of one session's envelope, prompts, and streamed
/// events, written as newline-delimited JSON.
///
/// The first record is always a `{_meta: ...}` envelope; one `{_prompt:
/// ...}` record precedes each `run()` call; all other records are streamed
/// `content`/`lifecycle` events.
pub struct ObservabilityLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl ObservabilityLog {
    /// Create (or truncate) the log file for `session_tag` under `dir`,
    /// writing the `_meta` envelope as the first record.
    pub async fn create(
        dir: impl AsRef<Path>,
        session_tag: &str,
        agent_type: evolve_core::AgentType,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(dir.as_ref()).await?;
        let path = dir.as_ref().join(format!("{session_tag}.jsonl"));
        let mut file = tokio::fs::File::create(&path).await?;

        let meta = json!({
            "_meta": {
                "tag": session_tag,
                "agent": agent_type,
                "contract_version": evolve_core::CONTRACT_VERSION,
            }
        });
        write_line(&mut file, &meta).await?;

        Ok(ObservabilityLog { path, file: Mutex::new(file) })
    }

    /// Path to the log file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a `_prompt` record, logged once per `run()` call before any
    /// events from that run.
    pub async fn record_prompt(&self, text: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        write_line(&mut file, &json!({ "_prompt": { "text": text } })).await
    }

    /// Append a raw stdout chunk.
    pub async fn record_stdout(&self, chunk: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        write_line(&mut file, &json!({ "stdout": chunk })).await
    }

    /// Append a raw stderr chunk.
    pub async fn record_stderr(&self, chunk: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        write_line(&mut file, &json!({ "stderr": chunk })).await
    }

    /// Append a structured content update.
    pub async fn record_content(&self, content: &serde_json::Value) -> Result<()> {
        let mut file = self.file.lock().await;
        write_line(&mut file, &json!({ "content": content })).await
    }

    /// Append a lifecycle transition.
    pub async fn record_lifecycle(&self, event: &LifecycleEvent) -> Result<()> {
        let mut file = self.file.lock().await;
        write_line(&mut file, &json!({ "lifecycle": event })).await
    }
}

async fn write_line(file: &mut tokio::fs::File, value: &impl Serialize) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_core::{AgentState, AgentType, LifecycleReason, SandboxState};

    #[tokio::test]
    async fn first_record_is_meta_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let log = ObservabilityLog::create(dir.path(), "evolve-abc123", AgentType::Claude).await.unwrap();
        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let first_line = contents.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(first_line).unwrap();
        assert_eq!(value["_meta"]["tag"], "evolve-abc123");
    }

    #[tokio::test]
    async fn records_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ObservabilityLog::create(dir.path(), "evolve-def456", AgentType::Claude).await.unwrap();
        log.record_prompt("do the thing").await.unwrap();
        log.record_lifecycle(&LifecycleEvent {
            sandbox_id: Some("sbx-1".into()),
            sandbox: SandboxState::Ready,
            agent: AgentState::Running,
            reason: LifecycleReason::RunStart,
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("_prompt"));
        assert!(lines[2].contains("lifecycle"));
    }
}
