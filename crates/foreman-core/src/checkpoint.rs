//! Checkpoint Manager (§4.8): durable snapshots of workflow/execution
//! progress, reloadable on resume.
//!
//! The filesystem backend is the one this repository implements:
//! `<root>/<execution_id>/v<NNNN>.json` plus a `latest` pointer file,
//! written atomically via write-to-temp-then-rename: the complete file
//! contents are built in memory before any single write call, and the
//! strictly-increasing version number gives resume its own optimistic-lock
//! check in place of a database's `WHERE status = $from` compare-and-swap.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Failed,
    Completed,
    Cancelled,
}

/// A durable snapshot of workflow state, per §3's Checkpoint entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub version: u64,
    pub status: CheckpointStatus,
    pub current_node: Option<String>,
    pub completed: HashSet<String>,
    pub pending: HashSet<String>,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
    pub graph_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(workflow_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            version: 1,
            status: CheckpointStatus::Running,
            current_node: None,
            completed: HashSet::new(),
            pending: HashSet::new(),
            data: HashMap::new(),
            error: None,
            graph_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// Metadata about one stored execution, as returned by `List`.
#[derive(Debug, Clone)]
pub struct CheckpointMeta {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub latest_version: u64,
    pub status: CheckpointStatus,
}

/// How seriously a write failure should be taken: §7's CheckpointError is a
/// warning in `BestEffort` mode and aborts the run in `Strict` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    BestEffort,
    Strict,
}

/// Storage contract for checkpoints. The filesystem backend below is the
/// only implementation in this repository; the trait exists so a networked
/// key-value store could stand in behind the same contract, per §4.8.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<u64, OrchestratorError>;
    async fn load(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, OrchestratorError>;
    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<CheckpointMeta>, OrchestratorError>;
    async fn delete(&self, execution_id: Uuid) -> Result<(), OrchestratorError>;
}

/// `<root>/<execution_id>/v<NNNN>.json` plus a `latest` pointer file.
pub struct FilesystemCheckpointStore {
    root: PathBuf,
    /// Serializes writers per execution id: this process is always the sole
    /// writer for a given execution, but concurrent tasks within it (e.g.
    /// parallel branches both reaching a checkpoint boundary) must not race.
    locks: tokio::sync::Mutex<HashMap<Uuid, std::sync::Arc<tokio::sync::Mutex<()>>>>,
}

impl FilesystemCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn execution_dir(&self, execution_id: Uuid) -> PathBuf {
        self.root.join(execution_id.to_string())
    }

    fn version_path(dir: &Path, version: u64) -> PathBuf {
        dir.join(format!("v{:04}.json", version))
    }

    fn latest_path(dir: &Path) -> PathBuf {
        dir.join("latest")
    }

    async fn lock_for(&self, execution_id: Uuid) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(execution_id)
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn read_latest_version(dir: &Path) -> Option<u64> {
        let contents = tokio::fs::read_to_string(Self::latest_path(dir)).await.ok()?;
        contents.trim().parse().ok()
    }

    /// Writes `contents` to `path` atomically: full contents to a sibling
    /// temp file, then an atomic rename, so a reader never observes a
    /// partially-written checkpoint.
    async fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await
    }
}

#[async_trait]
impl CheckpointStore for FilesystemCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<u64, OrchestratorError> {
        let lock = self.lock_for(checkpoint.execution_id).await;
        let _guard = lock.lock().await;

        let dir = self.execution_dir(checkpoint.execution_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OrchestratorError::CheckpointError(format!("create dir: {e}")))?;

        let current_latest = Self::read_latest_version(&dir).await.unwrap_or(0);
        let next_version = current_latest + 1;
        if checkpoint.version != next_version {
            return Err(OrchestratorError::CheckpointError(format!(
                "version mismatch: expected {next_version}, got {}",
                checkpoint.version
            )));
        }

        let body = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| OrchestratorError::CheckpointError(format!("serialize: {e}")))?;
        Self::atomic_write(&Self::version_path(&dir, next_version), &body)
            .await
            .map_err(|e| OrchestratorError::CheckpointError(format!("write version file: {e}")))?;
        Self::atomic_write(&Self::latest_path(&dir), &next_version.to_string())
            .await
            .map_err(|e| OrchestratorError::CheckpointError(format!("write latest pointer: {e}")))?;

        tracing::info!(execution_id = %checkpoint.execution_id, version = next_version, status = ?checkpoint.status, "checkpoint written");
        Ok(next_version)
    }

    async fn load(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, OrchestratorError> {
        let dir = self.execution_dir(execution_id);
        let Some(version) = Self::read_latest_version(&dir).await else {
            return Ok(None);
        };
        let path = Self::version_path(&dir, version);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OrchestratorError::CheckpointError(format!("read: {e}"))),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .map_err(|e| OrchestratorError::CheckpointError(format!("deserialize: {e}")))?;
        Ok(Some(checkpoint))
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<CheckpointMeta>, OrchestratorError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(OrchestratorError::CheckpointError(format!("list: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::CheckpointError(format!("list: {e}")))?
        {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            if let Some(checkpoint) = self.load(id).await? {
                if workflow_id.is_some_and(|w| w != checkpoint.workflow_id) {
                    continue;
                }
                out.push(CheckpointMeta {
                    execution_id: checkpoint.execution_id,
                    workflow_id: checkpoint.workflow_id,
                    latest_version: checkpoint.version,
                    status: checkpoint.status,
                });
            }
        }
        Ok(out)
    }

    async fn delete(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        let dir = self.execution_dir(execution_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                // Deletion is best-effort per §4.8; log, don't fail the caller.
                tracing::warn!(execution_id = %execution_id, error = %e, "checkpoint deletion failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        let exec_id = Uuid::new_v4();
        let mut cp = Checkpoint::new("wf", exec_id);
        cp.completed.insert("t1".to_string());

        let v = store.save(&cp).await.unwrap();
        assert_eq!(v, 1);

        let loaded = store.load(exec_id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "wf");
        assert_eq!(loaded.completed, cp.completed);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn versions_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        let exec_id = Uuid::new_v4();

        let mut cp = Checkpoint::new("wf", exec_id);
        assert_eq!(store.save(&cp).await.unwrap(), 1);
        cp.version = 2;
        cp.status = CheckpointStatus::Completed;
        assert_eq!(store.save(&cp).await.unwrap(), 2);

        let loaded = store.load(exec_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.status, CheckpointStatus::Completed);
    }

    #[tokio::test]
    async fn out_of_order_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        let exec_id = Uuid::new_v4();
        let mut cp = Checkpoint::new("wf", exec_id);
        cp.version = 5;
        assert!(store.save(&cp).await.is_err());
    }

    #[tokio::test]
    async fn missing_execution_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_best_effort_on_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        store.delete(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_workflow_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemCheckpointStore::new(dir.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.save(&Checkpoint::new("alpha", a)).await.unwrap();
        store.save(&Checkpoint::new("beta", b)).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let alpha_only = store.list(Some("alpha")).await.unwrap();
        assert_eq!(alpha_only.len(), 1);
        assert_eq!(alpha_only[0].execution_id, a);
    }
}
