//! In-memory checkpoint storage
//!
//! Checkpoints live in a process-local map and vanish with the process. Suitable for tests and
//! for short-lived human-in-the-loop sessions where durability is not required.

use crate::{
    checkpoint::WorkflowCheckpoint,
    error::Result,
    traits::{sort_checkpoints, CheckpointStorage},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CheckpointMap = Arc<RwLock<HashMap<String, WorkflowCheckpoint>>>;

/// Ephemeral [`CheckpointStorage`] backed by a `HashMap`.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: CheckpointMap,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Remove every checkpoint
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String> {
        let id = checkpoint.checkpoint_id.clone();
        tracing::debug!(
            checkpoint_id = %id,
            workflow_id = %checkpoint.workflow_id,
            iteration = checkpoint.iteration_count,
            "Saving checkpoint in memory"
        );
        self.checkpoints.write().await.insert(id.clone(), checkpoint);
        Ok(id)
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.checkpoints.read().await.get(checkpoint_id).cloned())
    }

    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowCheckpoint>> {
        let checkpoints = self.checkpoints.read().await;
        let mut results: Vec<WorkflowCheckpoint> = checkpoints
            .values()
            .filter(|cp| workflow_id.map_or(true, |id| cp.workflow_id == id))
            .cloned()
            .collect();
        sort_checkpoints(&mut results);
        Ok(results)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        Ok(self.checkpoints.write().await.remove(checkpoint_id).is_some())
    }
}
