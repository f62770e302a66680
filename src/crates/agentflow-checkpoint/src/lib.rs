//! # agentflow-checkpoint - State Persistence for Workflow Execution
//!
//! **Checkpoint data model and storage backends** for persisting and restoring workflow runs.
//!
//! ## Overview
//!
//! A [`WorkflowCheckpoint`] is a snapshot of the workflow runner taken at a superstep boundary:
//! undelivered messages, shared state, every executor's local state, fan-in buffers, pending
//! human/external requests and iteration counters. Restoring one into a freshly built workflow
//! continues execution exactly where the original left off.
//!
//! Checkpoints enable:
//!
//! - **Human-in-the-Loop** - Pause on a request, persist, answer hours later in another process
//! - **Fault Recovery** - Resume from the last completed superstep after a crash
//! - **Inspection** - Every checkpoint is a plain JSON document
//!
//! ## Storage
//!
//! The [`CheckpointStorage`] trait is narrow: `save`, `load`, `list`, `delete`.
//!
//! - [`InMemoryCheckpointStorage`] - ephemeral map, test-oriented
//! - [`FileCheckpointStorage`] - one JSON file per checkpoint, durable and human-readable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentflow_checkpoint::{CheckpointStorage, InMemoryCheckpointStorage, WorkflowCheckpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = InMemoryCheckpointStorage::new();
//!
//!     let id = storage.save(WorkflowCheckpoint::new("workflow-1", 100)).await?;
//!     let restored = storage.load(&id).await?.expect("just saved");
//!     assert_eq!(restored.workflow_id, "workflow-1");
//!
//!     assert!(storage.delete(&id).await?);
//!     assert!(!storage.delete(&id).await?);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use checkpoint::{CheckpointId, WorkflowCheckpoint};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStorage;
pub use memory::InMemoryCheckpointStorage;
pub use traits::CheckpointStorage;
