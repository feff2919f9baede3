//! A filesystem-backed, content-addressed checkpoint store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use evolve_core::{AgentType, CheckpointInfo, WorkspaceMode};
use evolve_error::{EvolveError, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::archive;

/// Reserved alias resolving to the newest checkpoint visible to a `get`
/// call.
pub const LATEST: &str = "latest";

/// Options accompanying a `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// The checkpoint this one descends from: the session's previous
    /// checkpoint, or the checkpoint a restore started from.
    pub parent_id: Option<String>,
    /// Free-text caller note.
    pub comment: Option<String>,
    /// Model identifier in use at capture time.
    pub model: Option<String>,
}

/// Filter accompanying a `list` or `get("latest")` call.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to entries captured under this session tag.
    pub tag: Option<String>,
    /// Cap on the number of entries returned.
    pub limit: Option<usize>,
}

/// Internal pagination cap applied when no caller-supplied `limit` is
/// given, so `list` never unboundedly scans a very large store.
const DEFAULT_PAGE_CAP: usize = 500;

struct Entry {
    info: CheckpointInfo,
    archive_path: PathBuf,
}

/// A checkpoint store rooted at a directory on disk.
///
/// Archive bytes are stored as `<root>/blobs/<hash>.tar.gz`, deduplicated
/// by content hash; sidecar metadata for every checkpoint `id` (even ones
/// sharing a blob) is kept in an in-memory index backed by
/// `<root>/index.json`.
pub struct FilesystemCheckpointStore {
    root: PathBuf,
    index: Mutex<Vec<Entry>>,
}

impl FilesystemCheckpointStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("blobs")).await?;
        let store = FilesystemCheckpointStore { root, index: Mutex::new(Vec::new()) };
        store.load_index().await?;
        Ok(store)
    }

    async fn load_index(&self) -> Result<()> {
        let index_path = self.root.join("index.json");
        if !index_path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&index_path).await?;
        let infos: Vec<CheckpointInfo> = serde_json::from_str(&raw)?;
        let mut index = self.index.lock().unwrap();
        for info in infos {
            let archive_path = self.blob_path(&info.hash);
            index.push(Entry { info, archive_path });
        }
        Ok(())
    }

    async fn persist_index(&self) -> Result<()> {
        let infos: Vec<CheckpointInfo> = {
            let index = self.index.lock().unwrap();
            index.iter().map(|e| e.info.clone()).collect()
        };
        let raw = serde_json::to_string_pretty(&infos)?;
        tokio::fs::write(self.root.join("index.json"), raw).await?;
        Ok(())
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join("blobs").join(format!("{hash}.tar.gz"))
    }

    /// Persist an archive, minting a fresh `id`. Content-identical archives
    /// reuse the same blob on disk but always get a distinct `id`.
    pub async fn put(
        &self,
        archive_bytes: &[u8],
        tag: impl Into<String>,
        agent_type: AgentType,
        workspace_mode: WorkspaceMode,
        options: PutOptions,
    ) -> Result<CheckpointInfo> {
        let hash = hex_sha256(archive_bytes);
        let blob_path = self.blob_path(&hash);
        if !blob_path.exists() {
            tokio::fs::write(&blob_path, archive_bytes).await?;
        }

        let info = CheckpointInfo {
            id: Uuid::new_v4().to_string(),
            hash,
            tag: tag.into(),
            timestamp: Utc::now(),
            size_bytes: archive_bytes.len() as u64,
            agent_type,
            model: options.model,
            workspace_mode,
            parent_id: options.parent_id,
            comment: options.comment,
        };

        {
            let mut index = self.index.lock().unwrap();
            index.push(Entry { info: info.clone(), archive_path: blob_path });
        }
        self.persist_index().await?;
        Ok(info)
    }

    /// List checkpoints newest-first, optionally scoped to a tag, capped at
    /// `filter.limit` (or an internal default cap). Returns
    /// `(entries, truncated)` where `truncated` is set whenever more
    /// matching entries existed than were returned.
    pub fn list(&self, filter: &ListFilter) -> (Vec<CheckpointInfo>, bool) {
        let index = self.index.lock().unwrap();
        let mut matching: Vec<&CheckpointInfo> = index
            .iter()
            .map(|e| &e.info)
            .filter(|info| filter.tag.as_deref().map_or(true, |t| info.tag == t))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let cap = filter.limit.unwrap_or(DEFAULT_PAGE_CAP);
        let truncated = matching.len() > cap;
        matching.truncate(cap);
        (matching.into_iter().cloned().collect(), truncated)
    }

    /// Resolve a checkpoint by id, or by the `"latest"` alias.
    ///
    /// `"latest"` with no tag filter resolves globally across the whole
    /// store; with a tag filter it resolves to the newest entry for that
    /// tag.
    pub fn get(&self, id_or_latest: &str, tag: Option<&str>) -> Result<CheckpointInfo> {
        if id_or_latest == LATEST {
            let filter = ListFilter { tag: tag.map(str::to_string), limit: Some(1) };
            let (entries, _) = self.list(&filter);
            return entries
                .into_iter()
                .next()
                .ok_or_else(|| EvolveError::Internal("no checkpoints available".into()));
        }

        let index = self.index.lock().unwrap();
        index
            .iter()
            .find(|e| e.info.id == id_or_latest)
            .map(|e| e.info.clone())
            .ok_or_else(|| EvolveError::Internal(format!("checkpoint not found: {id_or_latest}")))
    }

    /// Download the full archive bytes for a checkpoint.
    pub async fn download_archive(&self, id_or_latest: &str, tag: Option<&str>) -> Result<Vec<u8>> {
        let info = self.get(id_or_latest, tag)?;
        let path = self.blob_path(&info.hash);
        let bytes = tokio::fs::read(&path).await?;
        let actual_hash = hex_sha256(&bytes);
        if actual_hash != info.hash {
            return Err(EvolveError::ChecksumMismatch { expected: info.hash, actual: actual_hash });
        }
        Ok(bytes)
    }

    /// Download and extract specific files (by exact path or suffix glob
    /// `*`) from a checkpoint's archive.
    pub async fn download_files(
        &self,
        id_or_latest: &str,
        tag: Option<&str>,
        files: Option<&[String]>,
        glob: Option<&str>,
    ) -> Result<evolve_core::FileMap> {
        let archive_bytes = self.download_archive(id_or_latest, tag).await?;
        if files.is_none() && glob.is_none() {
            return archive::extract_archive(&archive_bytes);
        }
        let files_owned = files.map(|f| f.to_vec());
        let glob_owned = glob.map(str::to_string);
        archive::extract_matching(&archive_bytes, move |path| {
            if let Some(files) = &files_owned {
                if files.iter().any(|f| f == path) {
                    return true;
                }
            }
            if let Some(pattern) = &glob_owned {
                return glob_match(pattern, path);
            }
            false
        })
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// A minimal glob matcher supporting a single trailing or leading `*`
/// wildcard, sufficient for `download_files(glob=...)`.
fn glob_match(pattern: &str, path: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == path,
        Some((prefix, suffix)) => path.starts_with(prefix) && path.ends_with(suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_core::files::FileContent;
    use evolve_core::FileMap;

    async fn sample_archive() -> Vec<u8> {
        let mut files = FileMap::new();
        files.insert("output/hello.txt".into(), FileContent::text("Hi"));
        archive::build_archive(&files).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::open(dir.path()).await.unwrap();
        let archive_bytes = sample_archive().await;

        let info = store
            .put(&archive_bytes, "evolve-abc123", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();

        assert_eq!(info.hash.len(), 64);
        let fetched = store.get(&info.id, None).unwrap();
        assert_eq!(fetched.hash, info.hash);
    }

    #[tokio::test]
    async fn identical_archives_share_hash_but_not_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::open(dir.path()).await.unwrap();
        let archive_bytes = sample_archive().await;

        let a = store
            .put(&archive_bytes, "t", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();
        let b = store
            .put(&archive_bytes, "t", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();

        assert_eq!(a.hash, b.hash);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn list_scopes_by_tag_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::open(dir.path()).await.unwrap();
        let archive_bytes = sample_archive().await;

        store
            .put(&archive_bytes, "session-a", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();
        let second = store
            .put(&archive_bytes, "session-a", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();
        store
            .put(&archive_bytes, "session-b", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();

        let (entries, truncated) = store.list(&ListFilter { tag: Some("session-a".into()), limit: None });
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second.id);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn get_latest_with_no_tag_is_global() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::open(dir.path()).await.unwrap();
        let archive_bytes = sample_archive().await;

        store
            .put(&archive_bytes, "session-a", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();
        let newest = store
            .put(&archive_bytes, "session-b", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();

        let latest = store.get(LATEST, None).unwrap();
        assert_eq!(latest.id, newest.id);
    }

    #[tokio::test]
    async fn download_archive_detects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::open(dir.path()).await.unwrap();
        let archive_bytes = sample_archive().await;
        let info = store
            .put(&archive_bytes, "t", AgentType::Claude, WorkspaceMode::Knowledge, PutOptions::default())
            .await
            .unwrap();

        tokio::fs::write(store.blob_path(&info.hash), b"corrupted").await.unwrap();
        let err = store.download_archive(&info.id, None).await.unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::ChecksumMismatch);
    }
}
