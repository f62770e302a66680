//! Checkpoint data structures
//!
//! A [`WorkflowCheckpoint`] is a point-in-time snapshot of a workflow runner taken at a
//! superstep boundary. Every payload it carries is plain JSON so that a checkpoint written by
//! one process can be inspected by hand or restored by another process.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  WorkflowCheckpoint                          │
//! │  ├── messages         (source → [message])   │
//! │  ├── shared_state     (key → value)          │
//! │  ├── executor_states  (executor → state)     │
//! │  ├── edge_states      (edge group → buffers) │
//! │  ├── pending_requests (request id → request) │
//! │  └── iteration_count / max_iterations        │
//! └──────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Unique identifier for a checkpoint
pub type CheckpointId = String;

/// Complete runner snapshot at a superstep boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowCheckpoint {
    /// Unique checkpoint ID
    pub checkpoint_id: CheckpointId,

    /// ID of the workflow instance that produced this checkpoint
    pub workflow_id: String,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Undelivered messages grouped by source executor, in send order
    #[serde(default)]
    pub messages: HashMap<String, Vec<Value>>,

    /// Workflow-scoped shared state
    #[serde(default)]
    pub shared_state: HashMap<String, Value>,

    /// Per-executor local state as produced by save hooks
    #[serde(default)]
    pub executor_states: HashMap<String, Value>,

    /// Routing state that outlives a superstep (fan-in buffers)
    #[serde(default)]
    pub edge_states: HashMap<String, Value>,

    /// Outstanding requests keyed by request id
    #[serde(default)]
    pub pending_requests: BTreeMap<String, Value>,

    /// Supersteps executed so far in the current run
    pub iteration_count: usize,

    /// Iteration bound of the workflow that produced this checkpoint
    pub max_iterations: usize,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Format version
    pub version: String,
}

impl WorkflowCheckpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Create an empty checkpoint for a workflow with a fresh id and the current time.
    pub fn new(workflow_id: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            timestamp: Utc::now(),
            messages: HashMap::new(),
            shared_state: HashMap::new(),
            executor_states: HashMap::new(),
            edge_states: HashMap::new(),
            pending_requests: BTreeMap::new(),
            iteration_count: 0,
            max_iterations,
            metadata: HashMap::new(),
            version: Self::CURRENT_VERSION.to_string(),
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = checkpoint_id.into();
        self
    }

    pub fn with_iteration_count(mut self, iteration_count: usize) -> Self {
        self.iteration_count = iteration_count;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Total number of undelivered messages across all sources.
    pub fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.pending_requests.is_empty()
    }

    /// The superstep recorded in metadata by automatic checkpointing, if any.
    pub fn superstep(&self) -> Option<u64> {
        self.metadata.get("superstep").and_then(Value::as_u64)
    }
}
