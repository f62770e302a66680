//! Workflow construction
//!
//! [`WorkflowBuilder`] collects executors and edge groups, validates the graph and freezes it
//! into a [`Workflow`]. Validation errors surface here and never at run time.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::{FunctionExecutor, WorkflowBuilder};
//!
//! # fn example() -> agentflow_core::Result<()> {
//! let upper = FunctionExecutor::new("upper")
//!     .on::<String, _, _>(|text, ctx| async move { ctx.send_message(&text.to_uppercase()) })
//!     .with_output::<String>();
//! let print = FunctionExecutor::new("print")
//!     .on::<String, _, _>(|text, ctx| async move { ctx.yield_output(&text) });
//!
//! let mut builder = WorkflowBuilder::new();
//! builder
//!     .add_executor(upper)
//!     .add_executor(print)
//!     .set_start_executor("upper")
//!     .add_edge("upper", "print")
//!     .with_max_iterations(10);
//! let workflow = builder.build()?;
//! assert_eq!(workflow.executor_ids(), ["upper", "print"]);
//! # Ok(())
//! # }
//! ```

use crate::config::WorkflowConfig;
use crate::edge::{Case, EdgeGroup};
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::message::Payload;
use crate::runner::{Runner, DEFAULT_MAX_ITERATIONS};
use crate::validation;
use crate::workflow::Workflow;
use agentflow_checkpoint::CheckpointStorage;
use std::sync::Arc;

pub struct WorkflowBuilder {
    id: Option<String>,
    name: Option<String>,
    start: Option<String>,
    executors: Vec<Box<dyn Executor>>,
    edge_groups: Vec<EdgeGroup>,
    max_iterations: usize,
    storage: Option<Arc<dyn CheckpointStorage>>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            start: None,
            executors: Vec::new(),
            edge_groups: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            storage: None,
        }
    }

    pub fn add_executor(&mut self, executor: impl Executor + 'static) -> &mut Self {
        self.executors.push(Box::new(executor));
        self
    }

    pub fn add_boxed_executor(&mut self, executor: Box<dyn Executor>) -> &mut Self {
        self.executors.push(executor);
        self
    }

    pub fn set_start_executor(&mut self, executor_id: impl Into<String>) -> &mut Self {
        self.start = Some(executor_id.into());
        self
    }

    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.edge_groups.push(EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: None,
        });
        self
    }

    /// Edge taken only when `condition` holds for the payload.
    pub fn add_edge_with_condition<F>(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: F,
    ) -> &mut Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.edge_groups.push(EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    /// Broadcast every payload from `source` to all `targets`.
    pub fn add_fan_out_edges<I, S>(&mut self, source: impl Into<String>, targets: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_groups.push(EdgeGroup::FanOut {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            selector: None,
        });
        self
    }

    /// Send each payload to the subset of `targets` chosen by `selector`.
    pub fn add_multi_selection_edge_group<I, S, F>(
        &mut self,
        source: impl Into<String>,
        targets: I,
        selector: F,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Payload, &[String]) -> Vec<String> + Send + Sync + 'static,
    {
        self.edge_groups.push(EdgeGroup::FanOut {
            source: source.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            selector: Some(Arc::new(selector)),
        });
        self
    }

    /// Route to the first case whose predicate holds, else to `default`.
    pub fn add_switch_case_edge_group(
        &mut self,
        source: impl Into<String>,
        cases: Vec<Case>,
        default: Option<&str>,
    ) -> &mut Self {
        self.edge_groups.push(EdgeGroup::SwitchCase {
            source: source.into(),
            cases,
            default: default.map(str::to_string),
        });
        self
    }

    /// Deliver one batch to `target` once every source has contributed.
    pub fn add_fan_in_edges<I, S>(&mut self, sources: I, target: impl Into<String>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_groups.push(EdgeGroup::FanIn {
            sources: sources.into_iter().map(Into::into).collect(),
            target: target.into(),
        });
        self
    }

    /// Direct edges between consecutive executors.
    pub fn add_chain(&mut self, executor_ids: &[&str]) -> &mut Self {
        for pair in executor_ids.windows(2) {
            self.add_edge(pair[0], pair[1]);
        }
        self
    }

    pub fn with_max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Save a checkpoint after every superstep.
    pub fn with_checkpoint_storage(&mut self, storage: Arc<dyn CheckpointStorage>) -> &mut Self {
        self.storage = Some(storage);
        self
    }

    /// Apply name, iteration bound and checkpoint backend from a configuration.
    pub fn with_config(&mut self, config: &WorkflowConfig) -> &mut Self {
        if let Some(name) = &config.name {
            self.name = Some(name.clone());
        }
        self.max_iterations = config.max_iterations;
        if let Some(storage) = config.checkpoint_storage() {
            self.storage = Some(storage);
        }
        self
    }

    /// Fixed workflow id. Checkpoints are listed per workflow id, so a process that resumes
    /// another process's run should build with the same id.
    pub fn with_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Validate the graph and freeze it.
    pub fn build(self) -> Result<Workflow> {
        if self.max_iterations == 0 {
            return Err(WorkflowError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        validation::validate(self.start.as_deref(), &self.executors, &self.edge_groups)?;

        let start = self.start.ok_or(crate::error::ValidationError::MissingStartExecutor)?;
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::debug!(
            workflow_id = %id,
            executors = self.executors.len(),
            edge_groups = self.edge_groups.len(),
            start = %start,
            "Built workflow"
        );

        let runner = Runner::new(start, self.executors, self.edge_groups, self.max_iterations);
        Ok(Workflow::new(id, self.name, runner, self.storage))
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
