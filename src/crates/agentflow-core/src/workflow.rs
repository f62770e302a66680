//! The built workflow and its run APIs
//!
//! A [`Workflow`] owns a frozen graph and the live executor instances. Each invocation (`run`,
//! `run_from_checkpoint`, `send_responses`) drives the runner until it quiesces and reports what
//! happened as [`WorkflowEvent`]s. Every API has a streaming twin that hands events out while the
//! supersteps are still executing:
//!
//! ```text
//!   handlers ──emit──▶ EventSink ──mpsc──▶ select! ──yield──▶ caller
//!                                            ▲
//!   superstep future ────────────────────────┘  (polled in the same loop)
//! ```
//!
//! The API takes `&mut self`: one invocation at a time per workflow instance.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::{FunctionExecutor, WorkflowBuilder, WorkflowRunState};
//!
//! # async fn example() -> agentflow_core::Result<()> {
//! let upper = FunctionExecutor::new("upper")
//!     .on::<String, _, _>(|text, ctx| async move { ctx.yield_output(&text.to_uppercase()) });
//!
//! let mut builder = WorkflowBuilder::new();
//! builder.add_executor(upper).set_start_executor("upper");
//! let mut workflow = builder.build()?;
//!
//! let result = workflow.run("hello".to_string()).await?;
//! assert_eq!(result.get_outputs::<String>()?, vec!["HELLO"]);
//! assert_eq!(result.final_state(), Some(WorkflowRunState::Idle));
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{self, SUPERSTEP_KEY};
use crate::edge::EdgeGroup;
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, WorkflowEvent, WorkflowRunResult, WorkflowRunState};
use crate::message::{Message, MessageData, Payload};
use crate::request::PendingRequest;
use crate::runner::Runner;
use crate::state::SharedState;
use agentflow_checkpoint::{CheckpointError, CheckpointStorage, WorkflowCheckpoint};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How an invocation begins.
enum RunStart {
    Fresh(Payload),
    Checkpoint(String),
    Responses(HashMap<String, Value>),
}

enum Step {
    Event(WorkflowEvent),
    Done(Result<()>),
}

pub struct Workflow {
    id: String,
    name: Option<String>,
    runner: Runner,
    storage: Option<Arc<dyn CheckpointStorage>>,
}

impl Workflow {
    pub(crate) fn new(
        id: String,
        name: Option<String>,
        runner: Runner,
        storage: Option<Arc<dyn CheckpointStorage>>,
    ) -> Self {
        Self {
            id,
            name,
            runner,
            storage,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn start_executor_id(&self) -> &str {
        &self.runner.start_executor_id
    }

    pub fn max_iterations(&self) -> usize {
        self.runner.max_iterations
    }

    /// Executor ids in registration order.
    pub fn executor_ids(&self) -> &[String] {
        &self.runner.executor_ids
    }

    pub fn edge_groups(&self) -> &[EdgeGroup] {
        &self.runner.edge_groups
    }

    /// Kinds the start executor accepts.
    pub fn input_kinds(&self) -> Vec<String> {
        self.runner
            .executors
            .get(&self.runner.start_executor_id)
            .map(|slot| slot.input_kinds.clone())
            .unwrap_or_default()
    }

    /// Kinds declared by any executor as outputs.
    pub fn output_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = Vec::new();
        for id in &self.runner.executor_ids {
            if let Some(slot) = self.runner.executors.get(id) {
                for kind in &slot.output_kinds {
                    if !kinds.contains(kind) {
                        kinds.push(kind.clone());
                    }
                }
            }
        }
        kinds
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.runner.requests.list()
    }

    /// Shared state of the current (or last) run.
    pub fn shared_state(&self) -> &SharedState {
        &self.runner.shared
    }

    /// Supersteps executed in the current run.
    pub fn iteration_count(&self) -> usize {
        self.runner.iteration
    }

    pub fn checkpoint_storage(&self) -> Option<&Arc<dyn CheckpointStorage>> {
        self.storage.as_ref()
    }

    /// Signature stored in checkpoints to detect restores into a different graph.
    pub fn graph_signature(&self) -> String {
        checkpoint::graph_signature(&self.runner)
    }

    /// Run from the start executor with a fresh working set.
    pub async fn run<T: MessageData>(&mut self, input: T) -> Result<WorkflowRunResult> {
        let payload = Payload::new(&input)?;
        self.run_payload(payload).await
    }

    pub async fn run_payload(&mut self, payload: Payload) -> Result<WorkflowRunResult> {
        self.collect(RunStart::Fresh(payload)).await
    }

    pub fn run_stream<T: MessageData>(
        &mut self,
        input: T,
    ) -> impl Stream<Item = Result<WorkflowEvent>> + Send + '_ {
        let start = Payload::new(&input).map(RunStart::Fresh);
        self.execute(start)
    }

    pub fn run_stream_payload(
        &mut self,
        payload: Payload,
    ) -> impl Stream<Item = Result<WorkflowEvent>> + Send + '_ {
        self.execute(Ok(RunStart::Fresh(payload)))
    }

    /// Load a checkpoint from the configured storage, restore it and continue.
    ///
    /// Pending requests of the checkpoint are re-emitted as `RequestInfo` events.
    pub async fn run_from_checkpoint(&mut self, checkpoint_id: &str) -> Result<WorkflowRunResult> {
        self.collect(RunStart::Checkpoint(checkpoint_id.to_string()))
            .await
    }

    pub fn run_stream_from_checkpoint(
        &mut self,
        checkpoint_id: impl Into<String>,
    ) -> impl Stream<Item = Result<WorkflowEvent>> + Send + '_ {
        self.execute(Ok(RunStart::Checkpoint(checkpoint_id.into())))
    }

    /// Answer pending requests and continue the run.
    ///
    /// Every id is validated before anything is injected; an unknown or already answered id
    /// fails with [`WorkflowError::UnknownRequest`]. Requests left unanswered stay pending.
    pub async fn send_responses(
        &mut self,
        responses: HashMap<String, Value>,
    ) -> Result<WorkflowRunResult> {
        self.collect(RunStart::Responses(responses)).await
    }

    pub fn send_responses_streaming(
        &mut self,
        responses: HashMap<String, Value>,
    ) -> impl Stream<Item = Result<WorkflowEvent>> + Send + '_ {
        self.execute(Ok(RunStart::Responses(responses)))
    }

    /// Capture the current state without persisting it.
    pub async fn snapshot(&self, metadata: HashMap<String, Value>) -> Result<WorkflowCheckpoint> {
        checkpoint::capture(&self.runner, &self.id, metadata).await
    }

    /// Capture the current state and save it to the configured storage.
    pub async fn create_checkpoint(&self, metadata: HashMap<String, Value>) -> Result<String> {
        let storage = self.require_storage()?;
        let checkpoint = self.snapshot(metadata).await?;
        Ok(storage.save(checkpoint).await?)
    }

    /// Checkpoints of this workflow instance, oldest first.
    pub async fn list_checkpoints(&self) -> Result<Vec<WorkflowCheckpoint>> {
        let storage = self.require_storage()?;
        Ok(storage.list(Some(&self.id)).await?)
    }

    /// Replace the working set with a checkpoint, without running anything.
    pub async fn restore_checkpoint(
        &mut self,
        checkpoint: &WorkflowCheckpoint,
    ) -> Result<Vec<PendingRequest>> {
        checkpoint::restore(&mut self.runner, checkpoint).await
    }

    fn require_storage(&self) -> Result<&Arc<dyn CheckpointStorage>> {
        self.storage
            .as_ref()
            .ok_or_else(|| WorkflowError::Configuration("no checkpoint storage configured".into()))
    }

    async fn collect(&mut self, start: RunStart) -> Result<WorkflowRunResult> {
        let stream = self.execute(Ok(start));
        futures::pin_mut!(stream);

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(WorkflowRunResult::new(events))
    }

    fn execute(
        &mut self,
        start: Result<RunStart>,
    ) -> impl Stream<Item = Result<WorkflowEvent>> + Send + '_ {
        try_stream! {
            let start = start?;
            let (tx, mut rx) = mpsc::unbounded_channel();
            let driver = self.drive(start, EventSink::new(tx));
            tokio::pin!(driver);

            loop {
                let step = tokio::select! {
                    biased;
                    Some(event) = rx.recv() => Step::Event(event),
                    result = &mut driver => Step::Done(result),
                };

                match step {
                    Step::Event(event) => yield event,
                    Step::Done(result) => {
                        while let Ok(event) = rx.try_recv() {
                            yield event;
                        }
                        result?;
                        break;
                    }
                }
            }
        }
    }

    async fn drive(&mut self, start: RunStart, sink: EventSink) -> Result<()> {
        // Preparation errors leave the workflow untouched and emit nothing
        let restored = self.prepare(start).await?;

        sink.emit(WorkflowEvent::Started {
            workflow_id: self.id.clone(),
        });
        sink.emit(WorkflowEvent::Status {
            state: WorkflowRunState::Started,
        });
        for request in restored {
            sink.emit(WorkflowEvent::RequestInfo { request });
        }

        match self.run_until_idle(&sink).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(workflow_id = %self.id, error = %e, "Workflow run failed");
                sink.emit(WorkflowEvent::Failed {
                    details: e.to_string(),
                });
                sink.emit(WorkflowEvent::Status {
                    state: WorkflowRunState::Failed,
                });
                Err(e)
            }
        }
    }

    async fn prepare(&mut self, start: RunStart) -> Result<Vec<PendingRequest>> {
        match start {
            RunStart::Fresh(payload) => {
                self.runner.reset_run();
                let start_id = self.runner.start_executor_id.clone();
                self.runner.enqueue(Message::input(payload, start_id));
                tracing::debug!(workflow_id = %self.id, "Starting run");
                Ok(Vec::new())
            }
            RunStart::Checkpoint(checkpoint_id) => {
                let storage = self.require_storage()?.clone();
                let checkpoint = storage
                    .load(&checkpoint_id)
                    .await?
                    .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.clone()))?;
                let pending = checkpoint::restore(&mut self.runner, &checkpoint).await?;
                tracing::debug!(
                    workflow_id = %self.id,
                    checkpoint_id = %checkpoint_id,
                    "Resuming from checkpoint"
                );
                Ok(pending)
            }
            RunStart::Responses(responses) => {
                let mut ids: Vec<&String> = responses.keys().collect();
                ids.sort();
                if let Some(unknown) = ids.iter().find(|id| !self.runner.requests.contains(id)) {
                    return Err(WorkflowError::UnknownRequest((*unknown).clone()));
                }

                for id in ids {
                    if let Some(request) = self.runner.requests.remove(id) {
                        let payload = request.response_payload(responses[id].clone());
                        tracing::debug!(
                            workflow_id = %self.id,
                            request_id = %id,
                            reply_to = %request.reply_to,
                            "Injecting response"
                        );
                        self.runner.enqueue(Message::response(request, payload));
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    async fn run_until_idle(&mut self, sink: &EventSink) -> Result<()> {
        let mut reported_pending = !self.runner.requests.is_empty();
        sink.emit(WorkflowEvent::Status {
            state: if reported_pending {
                WorkflowRunState::InProgressPendingRequests
            } else {
                WorkflowRunState::InProgress
            },
        });

        while self.runner.has_messages() {
            if self.runner.limit_reached() {
                tracing::warn!(
                    workflow_id = %self.id,
                    max_iterations = self.runner.max_iterations,
                    queued = self.runner.queue.len(),
                    "Iteration limit reached with messages still queued"
                );
                return Err(WorkflowError::IterationLimitExceeded {
                    max_iterations: self.runner.max_iterations,
                    history: sink.history(),
                });
            }

            self.runner.superstep(sink).await?;

            if !reported_pending && !self.runner.requests.is_empty() {
                reported_pending = true;
                sink.emit(WorkflowEvent::Status {
                    state: WorkflowRunState::InProgressPendingRequests,
                });
            }

            self.auto_checkpoint().await?;
        }

        let state = if self.runner.requests.is_empty() {
            WorkflowRunState::Idle
        } else {
            WorkflowRunState::IdleWithPendingRequests
        };
        sink.emit(WorkflowEvent::Status { state });
        tracing::debug!(
            workflow_id = %self.id,
            iterations = self.runner.iteration,
            state = ?state,
            "Run is idle"
        );
        Ok(())
    }

    async fn auto_checkpoint(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let mut metadata = HashMap::new();
        metadata.insert(SUPERSTEP_KEY.to_string(), Value::from(self.runner.iteration));
        let checkpoint = checkpoint::capture(&self.runner, &self.id, metadata).await?;
        storage.save(checkpoint).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start_executor_id", &self.runner.start_executor_id)
            .field("executors", &self.runner.executor_ids)
            .field("edge_groups", &self.runner.edge_groups)
            .field("max_iterations", &self.runner.max_iterations)
            .finish()
    }
}
