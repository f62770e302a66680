//! Capturing and restoring runner state
//!
//! A capture happens at a superstep boundary, when no handler holds an executor lock. Each
//! executor's save hook runs exactly once; executors without a hook contribute their context
//! state slot instead. Queued messages are stored per source together with their global queue
//! position, so a restore re-enqueues them in the original order.
//!
//! Checkpoints carry a graph signature in their metadata. Restoring into a workflow whose
//! executors or edges differ fails with [`CheckpointError::Incompatible`]. A restore hook that
//! rejects its state fails with [`CheckpointError::Corrupt`] before the working set is replaced.

use crate::edge::FanInBuffer;
use crate::error::{Result, WorkflowError};
use crate::message::Message;
use crate::request::PendingRequest;
use crate::runner::Runner;
use agentflow_checkpoint::{CheckpointError, WorkflowCheckpoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const GRAPH_SIGNATURE_KEY: &str = "graph_signature";
pub const SUPERSTEP_KEY: &str = "superstep";

#[derive(Serialize, Deserialize)]
struct QueuedMessage {
    position: usize,
    message: Message,
}

/// Identifies the graph shape: start executor, executor ids and edge groups.
pub(crate) fn graph_signature(runner: &Runner) -> String {
    let mut executors = runner.executor_ids.clone();
    executors.sort();
    let edges: Vec<String> = runner.edge_groups.iter().map(|g| g.id()).collect();
    format!(
        "start={};executors={};edges={}",
        runner.start_executor_id,
        executors.join(","),
        edges.join("|")
    )
}

pub(crate) async fn capture(
    runner: &Runner,
    workflow_id: &str,
    metadata: HashMap<String, Value>,
) -> Result<WorkflowCheckpoint> {
    let mut checkpoint = WorkflowCheckpoint::new(workflow_id, runner.max_iterations)
        .with_iteration_count(runner.iteration);

    for id in &runner.executor_ids {
        let Some(slot) = runner.executors.get(id) else {
            continue;
        };
        let hooked = slot
            .executor
            .lock()
            .await
            .snapshot_state()
            .await
            .map_err(|e| WorkflowError::executor(id.clone(), e))?;
        if let Some(state) = hooked.or_else(|| runner.local_states.get(id)) {
            checkpoint.executor_states.insert(id.clone(), state);
        }
    }

    checkpoint.shared_state = runner.shared.snapshot();

    for (position, message) in runner.queue.iter().enumerate() {
        let entry = serde_json::to_value(QueuedMessage {
            position,
            message: message.clone(),
        })?;
        checkpoint
            .messages
            .entry(message.source_id.clone())
            .or_default()
            .push(entry);
    }

    for (edge_id, buffer) in &runner.fan_in {
        if !buffer.is_empty() {
            checkpoint
                .edge_states
                .insert(edge_id.clone(), serde_json::to_value(buffer)?);
        }
    }

    for request in runner.requests.list() {
        checkpoint
            .pending_requests
            .insert(request.request_id.clone(), serde_json::to_value(&request)?);
    }

    checkpoint.metadata = metadata;
    checkpoint
        .metadata
        .insert(GRAPH_SIGNATURE_KEY.to_string(), Value::String(graph_signature(runner)));

    tracing::debug!(
        checkpoint_id = %checkpoint.checkpoint_id,
        workflow_id = %workflow_id,
        iteration = runner.iteration,
        messages = checkpoint.message_count(),
        pending_requests = checkpoint.pending_requests.len(),
        "Captured checkpoint"
    );
    Ok(checkpoint)
}

/// Replace the runner's working set with the checkpoint contents.
///
/// Returns the restored pending requests.
pub(crate) async fn restore(
    runner: &mut Runner,
    checkpoint: &WorkflowCheckpoint,
) -> Result<Vec<PendingRequest>> {
    if let Some(signature) = checkpoint.metadata.get(GRAPH_SIGNATURE_KEY) {
        let expected = graph_signature(runner);
        if signature.as_str() != Some(expected.as_str()) {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint {} was taken from a different graph",
                checkpoint.checkpoint_id
            ))
            .into());
        }
    }
    for id in checkpoint.executor_states.keys() {
        if !runner.executors.contains_key(id) {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint {} references unknown executor '{}'",
                checkpoint.checkpoint_id, id
            ))
            .into());
        }
    }

    // Decode everything before touching the runner
    let mut queued = Vec::with_capacity(checkpoint.message_count());
    for entries in checkpoint.messages.values() {
        for entry in entries {
            let item: QueuedMessage = serde_json::from_value(entry.clone())
                .map_err(|e| CheckpointError::corrupt(&checkpoint.checkpoint_id, e))?;
            queued.push(item);
        }
    }
    queued.sort_by_key(|q| q.position);

    let mut buffers = HashMap::new();
    for (edge_id, value) in &checkpoint.edge_states {
        let buffer: FanInBuffer = serde_json::from_value(value.clone())
            .map_err(|e| CheckpointError::corrupt(&checkpoint.checkpoint_id, e))?;
        buffers.insert(edge_id.clone(), buffer);
    }

    let mut pending = Vec::with_capacity(checkpoint.pending_requests.len());
    for value in checkpoint.pending_requests.values() {
        let request: PendingRequest = serde_json::from_value(value.clone())
            .map_err(|e| CheckpointError::corrupt(&checkpoint.checkpoint_id, e))?;
        pending.push(request);
    }

    // Hooks run before the working set is replaced; a rejected state leaves it untouched
    let mut unhooked = Vec::new();
    for (id, state) in &checkpoint.executor_states {
        if let Some(slot) = runner.executors.get(id) {
            let restored = slot
                .executor
                .lock()
                .await
                .restore_state(state.clone())
                .await
                .map_err(|e| {
                    CheckpointError::corrupt(
                        &checkpoint.checkpoint_id,
                        format!("executor '{}' rejected its state: {}", id, e),
                    )
                })?;
            if !restored {
                unhooked.push((id.clone(), state.clone()));
            }
        }
    }

    runner.reset_run();

    for (id, state) in unhooked {
        runner.local_states.set(&id, state);
    }

    runner.shared.replace(checkpoint.shared_state.clone());
    runner.queue.extend(queued.into_iter().map(|q| q.message));
    runner.fan_in = buffers;
    for request in &pending {
        runner.requests.insert(request.clone())?;
    }
    runner.iteration = checkpoint.iteration_count;

    tracing::debug!(
        checkpoint_id = %checkpoint.checkpoint_id,
        iteration = runner.iteration,
        messages = runner.queue.len(),
        pending_requests = pending.len(),
        "Restored checkpoint"
    );
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeGroup;
    use crate::executor::{Executor, FunctionExecutor};
    use crate::message::Payload;
    use serde_json::json;

    fn runner() -> Runner {
        let a: Box<dyn Executor> =
            Box::new(FunctionExecutor::new("a").on::<i64, _, _>(|_, _| async { Ok(()) }));
        let b: Box<dyn Executor> =
            Box::new(FunctionExecutor::new("b").on::<i64, _, _>(|_, _| async { Ok(()) }));
        Runner::new(
            "a".into(),
            vec![a, b],
            vec![EdgeGroup::Single {
                source: "a".into(),
                target: "b".into(),
                condition: None,
            }],
            10,
        )
    }

    #[tokio::test]
    async fn test_capture_and_restore_working_set() {
        let mut source = runner();
        source.enqueue(Message::new(Payload::new(&1i64).unwrap(), "a"));
        source.enqueue(Message::new(Payload::new(&2i64).unwrap(), "b"));
        source.enqueue(Message::new(Payload::new(&3i64).unwrap(), "a"));
        source.shared.set("seen", json!(["x"]));
        source.local_states.set("b", json!({"count": 2}));
        source
            .requests
            .insert(PendingRequest::new(
                "r1",
                "b",
                Payload::new(&"approve?".to_string()).unwrap(),
                "bool",
            ))
            .unwrap();
        source.iteration = 3;

        let checkpoint = capture(&source, "wf", HashMap::new()).await.unwrap();
        assert_eq!(checkpoint.message_count(), 3);
        assert_eq!(checkpoint.iteration_count, 3);
        assert!(checkpoint.metadata.contains_key(GRAPH_SIGNATURE_KEY));

        let mut target = runner();
        let pending = restore(&mut target, &checkpoint).await.unwrap();

        assert_eq!(pending.len(), 1);
        assert!(target.requests.contains("r1"));
        assert_eq!(target.iteration, 3);
        assert_eq!(target.shared.get("seen"), Some(json!(["x"])));
        assert_eq!(target.local_states.get("b"), Some(json!({"count": 2})));
        let order: Vec<_> = target.queue.iter().map(|m| m.payload.data.clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_restore_rejects_other_graph() {
        let checkpoint = capture(&runner(), "wf", HashMap::new()).await.unwrap();

        let c: Box<dyn Executor> =
            Box::new(FunctionExecutor::new("c").on::<i64, _, _>(|_, _| async { Ok(()) }));
        let mut other = Runner::new("c".into(), vec![c], vec![], 10);

        let err = restore(&mut other, &checkpoint).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::WorkflowError::Checkpoint(CheckpointError::Incompatible(_))
        ));
    }

    /// Executor whose hooks only accept `{"ok": true}`.
    struct Strict;

    #[async_trait::async_trait]
    impl Executor for Strict {
        fn id(&self) -> &str {
            "a"
        }

        fn input_kinds(&self) -> Vec<String> {
            vec!["int".to_string()]
        }

        async fn handle(&mut self, _payload: Payload, _ctx: crate::context::WorkflowContext) -> Result<()> {
            Ok(())
        }

        async fn snapshot_state(&self) -> Result<Option<Value>> {
            Err(WorkflowError::custom("state is not serializable"))
        }

        async fn restore_state(&mut self, state: Value) -> Result<bool> {
            if state["ok"] == json!(true) {
                Ok(true)
            } else {
                Err(WorkflowError::custom("unexpected state shape"))
            }
        }
    }

    fn strict_runner() -> Runner {
        let b: Box<dyn Executor> =
            Box::new(FunctionExecutor::new("b").on::<i64, _, _>(|_, _| async { Ok(()) }));
        Runner::new(
            "a".into(),
            vec![Box::new(Strict), b],
            vec![EdgeGroup::Single {
                source: "a".into(),
                target: "b".into(),
                condition: None,
            }],
            10,
        )
    }

    #[tokio::test]
    async fn test_rejected_hook_state_is_corrupt() {
        let mut source = runner();
        source.enqueue(Message::new(Payload::new(&1i64).unwrap(), "a"));
        let mut checkpoint = capture(&source, "wf", HashMap::new()).await.unwrap();
        checkpoint
            .executor_states
            .insert("a".into(), json!({ "garbage": true }));

        let mut target = strict_runner();
        target.shared.set("keep", json!(1));
        target.enqueue(Message::new(Payload::new(&9i64).unwrap(), "a"));

        let err = restore(&mut target, &checkpoint).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Checkpoint(CheckpointError::Corrupt { .. })
        ));
        assert_eq!(target.shared.get("keep"), Some(json!(1)));
        assert_eq!(target.queue.len(), 1);
        assert!(target.local_states.get("a").is_none());

        checkpoint.executor_states.insert("a".into(), json!({ "ok": true }));
        restore(&mut target, &checkpoint).await.unwrap();
        assert_eq!(target.queue.len(), 1);
        assert!(target.shared.get("keep").is_none());
    }

    #[tokio::test]
    async fn test_failing_snapshot_hook_fails_capture() {
        let err = capture(&strict_runner(), "wf", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Executor { ref executor_id, .. } if executor_id == "a"));
    }
}
