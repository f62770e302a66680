//! Storage abstraction for workflow checkpoints
//!
//! [`CheckpointStorage`] is the narrow persisted-state boundary of the engine. The runner only
//! ever saves, loads, lists and deletes whole checkpoints, so a backend needs no knowledge of
//! what is inside them.
//!
//! Two backends ship with this crate and are interchangeable behind `Arc<dyn CheckpointStorage>`:
//!
//! - [`InMemoryCheckpointStorage`](crate::InMemoryCheckpointStorage) - ephemeral, for tests
//! - [`FileCheckpointStorage`](crate::FileCheckpointStorage) - one JSON document per checkpoint
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use agentflow_checkpoint::{CheckpointStorage, WorkflowCheckpoint, Result};
//! use async_trait::async_trait;
//!
//! struct RedisCheckpointStorage { /* ... */ }
//!
//! #[async_trait]
//! impl CheckpointStorage for RedisCheckpointStorage {
//!     async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String> { todo!() }
//!     async fn load(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>> { todo!() }
//!     async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowCheckpoint>> { todo!() }
//!     async fn delete(&self, checkpoint_id: &str) -> Result<bool> { todo!() }
//! }
//! ```

use crate::{checkpoint::WorkflowCheckpoint, error::Result};
use async_trait::async_trait;

/// Persistence backend for workflow checkpoints.
///
/// Contract shared by all backends:
///
/// - `save` overwrites an existing checkpoint with the same id and returns the id
/// - `load` returns `Ok(None)` for unknown ids and an error for unreadable documents
/// - `list` is ordered oldest first and skips entries that cannot be decoded
/// - `delete` returns `Ok(false)` when nothing was deleted, including repeated deletes
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Persist a checkpoint and return its id.
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<String>;

    /// Load a checkpoint by id.
    async fn load(&self, checkpoint_id: &str) -> Result<Option<WorkflowCheckpoint>>;

    /// List checkpoints, optionally restricted to one workflow, oldest first.
    async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<WorkflowCheckpoint>>;

    /// Delete a checkpoint. Returns whether a checkpoint was removed.
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// List checkpoint ids, oldest first.
    async fn list_ids(&self, workflow_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .list(workflow_id)
            .await?
            .into_iter()
            .map(|checkpoint| checkpoint.checkpoint_id)
            .collect())
    }

    /// Most recent checkpoint of a workflow.
    async fn latest(&self, workflow_id: &str) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.list(Some(workflow_id)).await?.pop())
    }
}

/// Sort checkpoints oldest first, breaking timestamp ties by iteration count.
pub(crate) fn sort_checkpoints(checkpoints: &mut [WorkflowCheckpoint]) {
    checkpoints.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.iteration_count.cmp(&b.iteration_count))
    });
}
