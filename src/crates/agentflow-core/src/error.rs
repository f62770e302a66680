//! Error types for workflow construction and execution
//!
//! Errors fall into a small taxonomy, and each kind surfaces at a different point:
//!
//! | Kind | Variant | When |
//! |------|---------|------|
//! | Configuration | [`WorkflowError::Validation`] | `WorkflowBuilder::build`, never at run time |
//! | Handler | [`WorkflowError::Executor`] | a handler returned an error during a superstep |
//! | Correlation | [`WorkflowError::UnknownRequest`], [`WorkflowError::DuplicateRequest`] | immediately, before anything is injected |
//! | Checkpoint | [`WorkflowError::Checkpoint`] | loading, saving or restoring a snapshot |
//! | Iteration bound | [`WorkflowError::IterationLimitExceeded`] | the run kept producing messages past `max_iterations` |
//!
//! Handler errors are not retried: retry semantics are domain-specific, so a handler that wants
//! them wraps its own external calls.

use crate::events::WorkflowEvent;
use agentflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised while building or running a workflow.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The graph definition is malformed
    #[error("Workflow validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A handler failed during a superstep
    #[error("Executor '{executor_id}' failed: {source}")]
    Executor {
        executor_id: String,
        #[source]
        source: Box<WorkflowError>,
    },

    /// A message was delivered directly to an executor that has no handler for its kind
    #[error("Executor '{executor_id}' cannot handle messages of kind '{kind}'")]
    UnhandledMessage { executor_id: String, kind: String },

    /// A response arrived for an executor without a matching response handler
    #[error("Executor '{executor_id}' has no response handler for requests of kind '{kind}'")]
    NoResponseHandler { executor_id: String, kind: String },

    /// A response was supplied for a request id that is not pending
    #[error("No pending request with id '{0}'")]
    UnknownRequest(String),

    /// A request was raised with an id that is already pending
    #[error("A request with id '{0}' is already pending")]
    DuplicateRequest(String),

    /// The run did not reach quiescence within the iteration bound
    #[error("Workflow did not converge within {max_iterations} supersteps")]
    IterationLimitExceeded {
        max_iterations: usize,
        /// Events observed before the bound was hit
        history: Vec<WorkflowEvent>,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Custom(String),
}

impl WorkflowError {
    /// Wrap a handler failure with the id of the executor that raised it.
    pub fn executor(executor_id: impl Into<String>, source: WorkflowError) -> Self {
        Self::Executor {
            executor_id: executor_id.into(),
            source: Box::new(source),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// True for caller-side correlation mistakes.
    pub fn is_correlation_error(&self) -> bool {
        matches!(self, Self::UnknownRequest(_) | Self::DuplicateRequest(_))
    }
}

/// Structural problems detected when a workflow is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No start executor was set")]
    MissingStartExecutor,

    #[error("Start executor '{0}' is not registered")]
    UnknownStartExecutor(String),

    #[error("Executor id '{0}' is registered more than once")]
    DuplicateExecutorId(String),

    #[error("Edge {edge} references unknown executor '{executor_id}'")]
    DanglingEdge { edge: String, executor_id: String },

    #[error("Edge {0} is declared more than once")]
    DuplicateEdge(String),

    #[error("Invalid edge group {edge}: {reason}")]
    InvalidEdgeGroup { edge: String, reason: String },

    #[error(
        "Edge {edge}: '{target}' accepts none of the kinds produced by '{source_id}' ({produced:?})"
    )]
    TypeIncompatibility {
        edge: String,
        source_id: String,
        target: String,
        produced: Vec<String>,
    },
}
