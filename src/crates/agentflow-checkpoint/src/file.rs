//! File-per-checkpoint JSON storage
//!
//! Each checkpoint is written to `{directory}/{checkpoint_id}.json` as a pretty-printed JSON
//! document, so checkpoints stay human-inspectable and readable from any language. Writes go to a
//! temporary file first and are moved into place with a rename, so a crash mid-write never leaves
//! a truncated document under the final name.

use crate::{
    checkpoint::WorkflowCheckpoint,
    error::{CheckpointError, Result},
    traits::{sort_checkpoints, CheckpointStorage},
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTENSION: &str = "json";

/// Durable [`CheckpointStorage`] keeping one JSON file per checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStorage {
    directory: PathBuf,
}

impl FileCheckpointStorage {
    /// Create a storage rooted at `directory`. The directory is created on the first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Create a storage rooted at `directory`, creating the directory eagerly.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self::new(directory);
        fs::create_dir_all(&storage.directory).await?;
        Ok(storage)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, checkpoint_id: &str) -> Result<PathBuf> {
        validate_id(checkpoint_id)?;
        Ok(self
            .directory
            .join(format!("{}.{}", checkpoint_id, EXTENSION)))
    }

    async fn read_checkpoint(path: &Path, id: &str) -> Result<WorkflowCheckpoint> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::corrupt(id, e))
    }
}

fn validate_id(checkpoint_id: &str) -> Result<()> {
    let invalid = checkpoint_id.is_empty()
        || checkpoint_id.contains('/')
        || checkpoint_id.contains('\\')
        || checkpoint_id.contains("..");
    if invalid {
        return Err(CheckpointError::InvalidId(checkpoint_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String> {
        let id = checkpoint.checkpoint_id.clone();
        let path = self.path_for(&id)?;
        let temp_path = self.directory.join(format!(".{}.{}.tmp", id, EXTENSION));

        let document = serde_json::to_vec_pretty(&checkpoint)?;
        fs::create_dir_all(&self.directory).await?;
        fs::write(&temp_path, &document).await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(
            checkpoint_id = %id,
            workflow_id = %checkpoint.workflow_id,
            path = %path.display(),
            "Saved checkpoint to file"
        );
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        let path = self.path_for(checkpoint_id)?;
        match Self::read_checkpoint(&path, checkpoint_id).await {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(CheckpointError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowCheckpoint>> {
        let mut results = Vec::new();
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_checkpoint {
                continue;
            }

            let id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();

            match Self::read_checkpoint(&path, &id).await {
                Ok(checkpoint) => {
                    if workflow_id.map_or(true, |wf| checkpoint.workflow_id == wf) {
                        results.push(checkpoint);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable checkpoint file"
                    );
                }
            }
        }

        sort_checkpoints(&mut results);
        Ok(results)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let path = self.path_for(checkpoint_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn storage() -> (tempfile::TempDir, FileCheckpointStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCheckpointStorage::open(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_save_writes_one_document_per_checkpoint() {
        let (dir, storage) = storage().await;
        let mut checkpoint = WorkflowCheckpoint::new("wf", 10);
        checkpoint
            .messages
            .insert("a".to_string(), vec![json!({"kind": "string", "data": "x"})]);

        let id = storage.save(checkpoint.clone()).await.unwrap();

        let path = dir.path().join(format!("{}.json", id));
        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["checkpoint_id"], id.as_str());
        assert_eq!(doc["messages"]["a"][0]["data"], "x");

        let loaded = storage.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let (_dir, storage) = storage().await;
        assert!(storage.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_an_error() {
        let (dir, storage) = storage().await;
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        let err = storage.load("broken").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_files() {
        let (dir, storage) = storage().await;
        storage.save(WorkflowCheckpoint::new("wf", 10)).await.unwrap();
        storage.save(WorkflowCheckpoint::new("wf", 10)).await.unwrap();
        storage.save(WorkflowCheckpoint::new("other", 10)).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"[1, 2").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(storage.list(None).await.unwrap().len(), 3);
        assert_eq!(storage.list(Some("wf")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, storage) = storage().await;
        let id = storage.save(WorkflowCheckpoint::new("wf", 10)).await.unwrap();

        assert!(storage.delete(&id).await.unwrap());
        assert!(!storage.delete(&id).await.unwrap());
        assert!(!storage.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let (_dir, storage) = storage().await;
        let checkpoint = WorkflowCheckpoint::new("wf", 10).with_checkpoint_id("../escape");

        let err = storage.save(checkpoint).await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidId(_)));
        assert!(matches!(
            storage.load("a/b").await.unwrap_err(),
            CheckpointError::InvalidId(_)
        ));
    }

    #[tokio::test]
    async fn test_lazy_directory_creation() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("runs").join("a");
        let storage = FileCheckpointStorage::new(&nested);
        assert!(storage.list(None).await.unwrap().is_empty());

        let id = storage.save(WorkflowCheckpoint::new("wf", 10)).await.unwrap();
        assert!(nested.join(format!("{}.json", id)).exists());
    }

    #[tokio::test]
    async fn test_survives_new_storage_instance() {
        let (dir, storage) = storage().await;
        let id = storage.save(WorkflowCheckpoint::new("wf", 10)).await.unwrap();

        let reopened = FileCheckpointStorage::open(dir.path()).await.unwrap();
        assert!(reopened.load(&id).await.unwrap().is_some());
    }
}
