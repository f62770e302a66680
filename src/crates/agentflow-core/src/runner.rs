//! Superstep runner
//!
//! The runner executes a workflow in bulk-synchronous rounds. Superstep `k` consumes the messages
//! produced in superstep `k - 1` (or the initial input / injected responses) and produces the
//! messages for `k + 1`:
//!
//! ```text
//!   queue ──▶ route ──▶ group by target ──▶ run targets concurrently ──▶ barrier ──▶ queue
//!             │  ▲                           (one task per target,
//!             ▼  │                            deliveries in arrival order)
//!          fan-in buffers
//! ```
//!
//! Deliveries for one target run sequentially inside a single task, so per-(source, target)
//! FIFO order is preserved and an executor is never invoked concurrently with itself.

use crate::context::{LocalStateStore, WorkflowContext};
use crate::edge::{EdgeGroup, FanInBuffer};
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, WorkflowEvent};
use crate::executor::Executor;
use crate::message::{kind_accepts, Message, Payload};
use crate::request::{PendingRequest, RequestRegistry};
use crate::state::SharedState;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default bound on supersteps per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

pub(crate) type SharedExecutor = Arc<Mutex<Box<dyn Executor>>>;

/// A registered executor with the kinds it declared at build time.
pub(crate) struct ExecutorSlot {
    pub(crate) input_kinds: Vec<String>,
    pub(crate) output_kinds: Vec<String>,
    pub(crate) executor: SharedExecutor,
}

impl ExecutorSlot {
    pub(crate) fn new(executor: Box<dyn Executor>) -> Self {
        Self {
            input_kinds: executor.input_kinds(),
            output_kinds: executor.output_kinds(),
            executor: Arc::new(Mutex::new(executor)),
        }
    }

    pub(crate) fn accepts(&self, kind: &str) -> bool {
        self.input_kinds.iter().any(|h| kind_accepts(h, kind))
    }
}

enum Delivery {
    Message(Payload),
    Response {
        request: PendingRequest,
        payload: Payload,
    },
}

/// Everything a handler context needs, cloned into each target task.
#[derive(Clone)]
struct ContextEnv {
    superstep: usize,
    shared: SharedState,
    sink: EventSink,
    requests: RequestRegistry,
    local_states: LocalStateStore,
}

impl ContextEnv {
    fn context(&self, executor_id: &str) -> WorkflowContext {
        WorkflowContext::new(
            executor_id,
            self.superstep,
            self.shared.clone(),
            self.sink.clone(),
            self.requests.clone(),
            self.local_states.clone(),
        )
    }
}

pub(crate) struct Runner {
    pub(crate) start_executor_id: String,
    pub(crate) executors: HashMap<String, ExecutorSlot>,
    /// Registration order
    pub(crate) executor_ids: Vec<String>,
    pub(crate) edge_groups: Vec<EdgeGroup>,
    pub(crate) max_iterations: usize,

    pub(crate) queue: VecDeque<Message>,
    pub(crate) fan_in: HashMap<String, FanInBuffer>,
    pub(crate) shared: SharedState,
    pub(crate) requests: RequestRegistry,
    pub(crate) local_states: LocalStateStore,
    pub(crate) iteration: usize,
}

impl Runner {
    pub(crate) fn new(
        start_executor_id: String,
        executors: Vec<Box<dyn Executor>>,
        edge_groups: Vec<EdgeGroup>,
        max_iterations: usize,
    ) -> Self {
        let executor_ids = executors.iter().map(|e| e.id().to_string()).collect();
        let executors = executors
            .into_iter()
            .map(|e| (e.id().to_string(), ExecutorSlot::new(e)))
            .collect();

        Self {
            start_executor_id,
            executors,
            executor_ids,
            edge_groups,
            max_iterations,
            queue: VecDeque::new(),
            fan_in: HashMap::new(),
            shared: SharedState::new(),
            requests: RequestRegistry::new(),
            local_states: LocalStateStore::default(),
            iteration: 0,
        }
    }

    /// Drop the working set of the previous run. Executor-local state is kept.
    pub(crate) fn reset_run(&mut self) {
        self.queue.clear();
        self.fan_in.clear();
        self.shared.clear();
        self.requests.clear();
        self.iteration = 0;
    }

    pub(crate) fn enqueue(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub(crate) fn has_messages(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn limit_reached(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Run one superstep over the queued messages.
    pub(crate) async fn superstep(&mut self, sink: &EventSink) -> Result<()> {
        let iteration = self.iteration + 1;

        // 1. Drain everything produced by the previous superstep
        let messages: Vec<Message> = self.queue.drain(..).collect();

        // 2. Route along edges, buffering fan-in contributions
        let deliveries = self.route(messages)?;

        sink.emit(WorkflowEvent::SuperstepStarted { iteration });
        tracing::debug!(iteration, targets = deliveries.len(), "Starting superstep");

        // 3. One task per target, all targets concurrently
        let env = ContextEnv {
            superstep: iteration,
            shared: self.shared.clone(),
            sink: sink.clone(),
            requests: self.requests.clone(),
            local_states: self.local_states.clone(),
        };
        let tasks: Vec<_> = deliveries
            .into_iter()
            .filter_map(|(target, batch)| {
                let executor = self.executors.get(&target)?.executor.clone();
                Some(run_target(target, executor, batch, env.clone()))
            })
            .collect();

        // 4. Barrier
        let results = join_all(tasks).await;

        // 5. Collect messages for the next superstep, in target order
        for result in results {
            let produced = result?;
            self.queue.extend(produced);
        }

        self.iteration = iteration;
        sink.emit(WorkflowEvent::SuperstepCompleted { iteration });
        tracing::debug!(
            iteration,
            queued = self.queue.len(),
            pending_requests = self.requests.len(),
            "Completed superstep"
        );
        Ok(())
    }

    /// Resolve messages into per-target deliveries, preserving arrival order.
    fn route(&mut self, messages: Vec<Message>) -> Result<Vec<(String, Vec<Delivery>)>> {
        let mut deliveries = DeliveryPlan::default();

        for message in messages {
            if message.is_internal() {
                self.route_internal(message, &mut deliveries)?;
                continue;
            }

            let mut delivered = false;
            for group in &self.edge_groups {
                if !group.has_source(&message.source_id) {
                    continue;
                }
                if let Some(target) = &message.target_id {
                    if !group.targets().contains(&target.as_str()) {
                        continue;
                    }
                }

                if let EdgeGroup::FanIn { sources, target } = group {
                    let buffer = self.fan_in.entry(group.id()).or_default();
                    buffer.push(&message.source_id, message.payload.clone());
                    delivered = true;

                    while let Some(batch) = buffer.take_batch(sources) {
                        match self.executors.get(target) {
                            Some(slot) if slot.accepts(&batch.kind) => {
                                deliveries.push(target, Delivery::Message(batch));
                            }
                            _ => tracing::warn!(
                                edge = %group.id(),
                                target = %target,
                                kind = %batch.kind,
                                "Target cannot handle fan-in batch, dropping it"
                            ),
                        }
                    }
                    continue;
                }

                for target in group.select_targets(&message.payload) {
                    if message.target_id.as_ref().map_or(false, |t| *t != target) {
                        continue;
                    }
                    match self.executors.get(&target) {
                        Some(slot) if slot.accepts(&message.payload.kind) => {
                            deliveries.push(&target, Delivery::Message(message.payload.clone()));
                            delivered = true;
                        }
                        _ => tracing::debug!(
                            edge = %group.id(),
                            target = %target,
                            kind = %message.payload.kind,
                            "Target cannot handle payload, skipping"
                        ),
                    }
                }
            }

            if !delivered {
                tracing::warn!(
                    source = %message.source_id,
                    target = ?message.target_id,
                    kind = %message.payload.kind,
                    "Message was not delivered to any executor"
                );
            }
        }

        Ok(deliveries.into_groups())
    }

    fn route_internal(&self, message: Message, deliveries: &mut DeliveryPlan) -> Result<()> {
        let target = message
            .target_id
            .clone()
            .unwrap_or_else(|| self.start_executor_id.clone());
        let slot = self
            .executors
            .get(&target)
            .ok_or_else(|| WorkflowError::UnhandledMessage {
                executor_id: target.clone(),
                kind: message.payload.kind.clone(),
            })?;

        match message.response_to {
            Some(request) => deliveries.push(
                &target,
                Delivery::Response {
                    request,
                    payload: message.payload,
                },
            ),
            None => {
                if !slot.accepts(&message.payload.kind) {
                    return Err(WorkflowError::UnhandledMessage {
                        executor_id: target,
                        kind: message.payload.kind,
                    });
                }
                deliveries.push(&target, Delivery::Message(message.payload));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct DeliveryPlan {
    groups: Vec<(String, Vec<Delivery>)>,
    index: HashMap<String, usize>,
}

impl DeliveryPlan {
    fn push(&mut self, target: &str, delivery: Delivery) {
        match self.index.get(target) {
            Some(&i) => self.groups[i].1.push(delivery),
            None => {
                self.index.insert(target.to_string(), self.groups.len());
                self.groups.push((target.to_string(), vec![delivery]));
            }
        }
    }

    fn into_groups(self) -> Vec<(String, Vec<Delivery>)> {
        self.groups
    }
}

async fn run_target(
    target: String,
    executor: SharedExecutor,
    deliveries: Vec<Delivery>,
    env: ContextEnv,
) -> Result<Vec<Message>> {
    let mut executor = executor.lock().await;
    let mut produced = Vec::new();

    for delivery in deliveries {
        let ctx = env.context(&target);
        env.sink.emit(WorkflowEvent::ExecutorInvoked {
            executor_id: target.clone(),
        });

        let result = match delivery {
            Delivery::Message(payload) => executor.handle(payload, ctx.clone()).await,
            Delivery::Response { request, payload } => {
                executor.handle_response(request, payload, ctx.clone()).await
            }
        };

        match result {
            Ok(()) => {
                env.sink.emit(WorkflowEvent::ExecutorCompleted {
                    executor_id: target.clone(),
                });
                produced.extend(ctx.take_messages());
            }
            Err(e) => {
                tracing::warn!(executor = %target, error = %e, "Executor failed");
                env.sink.emit(WorkflowEvent::ExecutorFailed {
                    executor_id: target.clone(),
                    error: e.to_string(),
                });
                return Err(WorkflowError::executor(target, e));
            }
        }
    }

    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FunctionExecutor;
    use tokio::sync::mpsc;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    fn forward(id: &str) -> Box<dyn Executor> {
        Box::new(FunctionExecutor::new(id).on::<i64, _, _>(|n, ctx| async move {
            ctx.send_message(&(n + 1))
        }))
    }

    fn single(source: &str, target: &str) -> EdgeGroup {
        EdgeGroup::Single {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    #[tokio::test]
    async fn test_superstep_moves_messages_one_hop() {
        let mut runner = Runner::new(
            "a".into(),
            vec![forward("a"), forward("b")],
            vec![single("a", "b")],
            10,
        );
        let (sink, _rx) = sink();
        runner.enqueue(Message::input(Payload::new(&1i64).unwrap(), "a"));

        runner.superstep(&sink).await.unwrap();
        assert_eq!(runner.iteration, 1);
        assert_eq!(runner.queue.len(), 1);
        assert_eq!(runner.queue[0].source_id, "a");

        runner.superstep(&sink).await.unwrap();
        assert_eq!(runner.queue[0].payload.data, serde_json::json!(3));

        // `b` has no outgoing edges, so its message is dropped when routed
        runner.superstep(&sink).await.unwrap();
        assert!(!runner.has_messages());
    }

    #[tokio::test]
    async fn test_input_of_unhandled_kind_fails() {
        let mut runner = Runner::new("a".into(), vec![forward("a")], vec![], 10);
        let (sink, _rx) = sink();
        runner.enqueue(Message::input(Payload::new(&true).unwrap(), "a"));

        let err = runner.superstep(&sink).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnhandledMessage { .. }));
    }

    #[tokio::test]
    async fn test_reset_keeps_local_state() {
        let mut runner = Runner::new("a".into(), vec![forward("a")], vec![], 10);
        runner.local_states.set("a", serde_json::json!(1));
        runner.shared.set("k", serde_json::json!(true));
        runner.iteration = 4;

        runner.reset_run();
        assert_eq!(runner.iteration, 0);
        assert!(runner.shared.is_empty());
        assert_eq!(runner.local_states.get("a"), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_fan_in_batch_of_unaccepted_kind_is_dropped() {
        let text = |id: &str| -> Box<dyn Executor> {
            Box::new(FunctionExecutor::new(id).on::<String, _, _>(|s, ctx| async move {
                ctx.send_message(&s)
            }))
        };
        let mut runner = Runner::new(
            "a".into(),
            vec![text("a"), text("b"), forward("join")],
            vec![EdgeGroup::FanIn {
                sources: vec!["a".into(), "b".into()],
                target: "join".into(),
            }],
            10,
        );
        let (sink, mut rx) = sink();
        runner.enqueue(Message::new(Payload::new(&"x".to_string()).unwrap(), "a"));
        runner.enqueue(Message::new(Payload::new(&"y".to_string()).unwrap(), "b"));

        runner.superstep(&sink).await.unwrap();
        assert!(runner.fan_in.values().all(FanInBuffer::is_empty));
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, WorkflowEvent::ExecutorInvoked { .. }));
        }
    }
}
