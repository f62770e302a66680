//! # agentflow-core - Superstep Workflow Engine
//!
//! **A graph of cooperating, stateful executors** that exchange typed messages, advance in
//! synchronized rounds, pause for human or external input, checkpoint and resume exactly where
//! they stopped, and nest whole workflows as single nodes.
//!
//! ## Core Concepts
//!
//! ### 1. Executors and typed messages
//!
//! An [`Executor`] is a node with a stable id and handlers keyed by payload kind. Values travel
//! as [`Payload`]s: a kind discriminant plus plain JSON. Rust types opt in through
//! [`MessageData`] (see [`message_kind!`]). [`FunctionExecutor`] builds executors from closures.
//!
//! ### 2. Edge groups
//!
//! - **Single** - direct or conditional
//! - **Fan-out** - broadcast, or a selector-chosen subset
//! - **Switch-case** - first matching predicate, else default
//! - **Fan-in** - one batch once every producer contributed
//!
//! ### 3. Supersteps
//!
//! Execution follows the bulk-synchronous model:
//!
//! ```text
//! superstep 1        superstep 2        superstep 3
//! ┌─────────┐        ┌─────────┐        ┌─────────┐
//! │ upper   │ ─────▶ │ reverse │ ─────▶ │ print   │ ──▶ Output("DC BA")
//! └─────────┘        └─────────┘        └─────────┘
//!      │ barrier          │ barrier          │ barrier
//! ```
//!
//! Handlers of one superstep run concurrently; their messages are delivered in the next one.
//! A run ends when no messages remain, or fails with
//! [`WorkflowError::IterationLimitExceeded`] after `max_iterations` supersteps.
//!
//! ### 4. Human-in-the-loop
//!
//! A handler raises a request with [`WorkflowContext::request_info`]. The run ends in
//! [`WorkflowRunState::IdleWithPendingRequests`]; the caller answers with
//! [`Workflow::send_responses`] and the executor's response handler continues the work.
//!
//! ### 5. Checkpoints
//!
//! With a [`CheckpointStorage`] configured, a checkpoint is saved after every superstep. A
//! freshly built workflow of the same definition resumes with [`Workflow::run_from_checkpoint`].
//!
//! ### 6. Sub-workflows
//!
//! [`WorkflowExecutor`] runs a nested workflow as one executor. Nested requests surface as
//! [`SubWorkflowRequestMessage`]s that a parent executor can answer or forward.
//!
//! ## Quick Start
//!
//! ```rust
//! use agentflow_core::{FunctionExecutor, WorkflowBuilder, WorkflowRunState};
//!
//! # async fn example() -> agentflow_core::Result<()> {
//! let upper = FunctionExecutor::new("upper")
//!     .on::<String, _, _>(|text, ctx| async move { ctx.send_message(&text.to_uppercase()) })
//!     .with_output::<String>();
//! let reverse = FunctionExecutor::new("reverse")
//!     .on::<String, _, _>(|text, ctx| async move {
//!         ctx.yield_output(&text.chars().rev().collect::<String>())
//!     });
//!
//! let mut builder = WorkflowBuilder::new();
//! builder
//!     .add_executor(upper)
//!     .add_executor(reverse)
//!     .set_start_executor("upper")
//!     .add_edge("upper", "reverse");
//! let mut workflow = builder.build()?;
//!
//! let result = workflow.run("ab cd".to_string()).await?;
//! assert_eq!(result.get_outputs::<String>()?, vec!["DC BA"]);
//! assert_eq!(result.final_state(), Some(WorkflowRunState::Idle));
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod edge;
pub mod error;
pub mod events;
pub mod executor;
pub mod message;
pub mod request;
pub mod runner;
pub mod state;
pub mod subworkflow;
mod validation;
pub mod workflow;

pub use approval::{ApprovalRequest, ApprovalResponse};
pub use builder::WorkflowBuilder;
pub use config::{CheckpointBackend, CheckpointSettings, WorkflowConfig};
pub use context::WorkflowContext;
pub use edge::{Case, EdgeCondition, EdgeGroup, EdgeSelector, FanInBuffer};
pub use error::{Result, ValidationError, WorkflowError};
pub use events::{WorkflowEvent, WorkflowRunResult, WorkflowRunState};
pub use executor::{Executor, FunctionExecutor};
pub use message::{Message, MessageData, Payload, ANY_KIND, INPUT_SOURCE, RESPONSE_SOURCE};
pub use request::{PendingRequest, RequestInfoExecutor, RequestRegistry};
pub use runner::DEFAULT_MAX_ITERATIONS;
pub use state::SharedState;
pub use subworkflow::{SubWorkflowRequestMessage, SubWorkflowResponseMessage, WorkflowExecutor};
pub use workflow::Workflow;

pub use agentflow_checkpoint::{
    CheckpointError, CheckpointStorage, FileCheckpointStorage, InMemoryCheckpointStorage,
    WorkflowCheckpoint,
};
