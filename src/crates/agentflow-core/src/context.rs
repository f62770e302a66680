//! Handler context
//!
//! A [`WorkflowContext`] is created for every handler invocation. It is the only way a handler
//! talks to the rest of the run: messages go to an outbox that the runner drains after the
//! superstep barrier, while outputs, requests and custom events are emitted immediately.

use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::error::Result;
use crate::events::{EventSink, WorkflowEvent};
use crate::message::{Message, MessageData, Payload};
use crate::request::{PendingRequest, RequestRegistry};
use crate::state::SharedState;
use crate::subworkflow::SubWorkflowRequestMessage;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executor-local state slots, keyed by executor id. Survive across runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalStateStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl LocalStateStore {
    pub(crate) fn get(&self, executor_id: &str) -> Option<Value> {
        self.inner.lock().get(executor_id).cloned()
    }

    pub(crate) fn set(&self, executor_id: &str, value: Value) {
        self.inner.lock().insert(executor_id.to_string(), value);
    }
}

#[derive(Clone)]
pub struct WorkflowContext {
    executor_id: String,
    superstep: usize,
    shared: SharedState,
    outbox: Arc<Mutex<Vec<Message>>>,
    sink: EventSink,
    requests: RequestRegistry,
    local_states: LocalStateStore,
}

impl WorkflowContext {
    pub(crate) fn new(
        executor_id: impl Into<String>,
        superstep: usize,
        shared: SharedState,
        sink: EventSink,
        requests: RequestRegistry,
        local_states: LocalStateStore,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            superstep,
            shared,
            outbox: Arc::new(Mutex::new(Vec::new())),
            sink,
            requests,
            local_states,
        }
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// 1-based superstep this invocation runs in.
    pub fn superstep(&self) -> usize {
        self.superstep
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.shared
    }

    pub fn get_shared<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.shared.get_as(key)
    }

    pub fn set_shared<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.shared.set_as(key, value)
    }

    /// Send along every outgoing edge.
    pub fn send_message<T: MessageData>(&self, message: &T) -> Result<()> {
        self.send_payload(Payload::new(message)?, None);
        Ok(())
    }

    /// Send only along edges leading to `target`.
    pub fn send_message_to<T: MessageData>(&self, message: &T, target: &str) -> Result<()> {
        self.send_payload(Payload::new(message)?, Some(target.to_string()));
        Ok(())
    }

    pub fn send_payload(&self, payload: Payload, target: Option<String>) {
        let mut message = Message::new(payload, self.executor_id.clone());
        message.target_id = target;
        self.outbox.lock().push(message);
    }

    /// Emit a workflow output.
    pub fn yield_output<T: MessageData>(&self, output: &T) -> Result<()> {
        self.yield_payload(Payload::new(output)?);
        Ok(())
    }

    pub fn yield_payload(&self, data: Payload) {
        self.sink.emit(WorkflowEvent::Output {
            executor_id: self.executor_id.clone(),
            data,
        });
    }

    /// Emit an application-defined event.
    pub fn add_event(&self, data: Value) {
        self.sink.emit(WorkflowEvent::Custom {
            executor_id: self.executor_id.clone(),
            data,
        });
    }

    /// Raise a request answered with a `Resp`. Returns the generated request id.
    pub fn request_info<Req: MessageData, Resp: MessageData>(&self, request: &Req) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.request_info_with_id::<Req, Resp>(request_id, request)
    }

    /// Raise a request under a caller-chosen id. An id that is already pending is rejected.
    pub fn request_info_with_id<Req: MessageData, Resp: MessageData>(
        &self,
        request_id: impl Into<String>,
        request: &Req,
    ) -> Result<String> {
        self.request_payload(request_id, Payload::new(request)?, Resp::kind())
    }

    /// Untyped form of [`request_info_with_id`](Self::request_info_with_id).
    pub fn request_payload(
        &self,
        request_id: impl Into<String>,
        payload: Payload,
        response_kind: impl Into<String>,
    ) -> Result<String> {
        let request =
            PendingRequest::new(request_id, self.executor_id.clone(), payload, response_kind);
        self.raise_request(request)
    }

    /// Ask for an approval decision.
    pub fn request_approval(&self, request: &ApprovalRequest) -> Result<String> {
        self.request_info::<ApprovalRequest, ApprovalResponse>(request)
    }

    /// Re-raise a request surfaced by a sub-workflow as a request of this workflow.
    ///
    /// The request keeps its id and payload; its response is delivered to this executor, which is
    /// expected to relay it back with `SubWorkflowResponseMessage::for_request`.
    pub fn forward_request(&self, message: &SubWorkflowRequestMessage) -> Result<String> {
        let mut request = message.request.clone();
        request.reply_to = self.executor_id.clone();
        if request.subworkflow_path.first() != Some(&message.executor_id) {
            request.subworkflow_path.insert(0, message.executor_id.clone());
        }
        self.raise_request(request)
    }

    pub(crate) fn raise_request(&self, request: PendingRequest) -> Result<String> {
        let request_id = request.request_id.clone();
        self.requests.insert(request.clone())?;
        tracing::debug!(
            executor = %self.executor_id,
            request_id = %request_id,
            kind = %request.payload.kind,
            "Raised request"
        );
        self.sink.emit(WorkflowEvent::RequestInfo { request });
        Ok(request_id)
    }

    /// This executor's local state slot.
    pub fn local_state<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.local_states.get(&self.executor_id) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_local_state<T: Serialize>(&self, state: &T) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.local_states.set(&self.executor_id, value);
        Ok(())
    }

    pub(crate) fn take_messages(&self) -> Vec<Message> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("executor_id", &self.executor_id)
            .field("superstep", &self.superstep)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use tokio::sync::mpsc;

    pub(crate) fn test_context(
        executor_id: &str,
    ) -> (WorkflowContext, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkflowContext::new(
            executor_id,
            1,
            SharedState::new(),
            EventSink::new(tx),
            RequestRegistry::new(),
            LocalStateStore::default(),
        );
        (ctx, rx)
    }

    #[test]
    fn test_messages_are_buffered_in_order() {
        let (ctx, _rx) = test_context("a");
        ctx.send_message(&"one".to_string()).unwrap();
        ctx.send_message_to(&2i64, "b").unwrap();

        let messages = ctx.take_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].source_id, "a");
        assert!(messages[0].target_id.is_none());
        assert_eq!(messages[1].target_id.as_deref(), Some("b"));
        assert!(ctx.take_messages().is_empty());
    }

    #[test]
    fn test_outputs_and_requests_emit_immediately() {
        let (ctx, mut rx) = test_context("a");
        ctx.yield_output(&"done".to_string()).unwrap();
        let id = ctx
            .request_info::<String, bool>(&"approve?".to_string())
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), WorkflowEvent::Output { .. }));
        match rx.try_recv().unwrap() {
            WorkflowEvent::RequestInfo { request } => {
                assert_eq!(request.request_id, id);
                assert_eq!(request.reply_to, "a");
                assert_eq!(request.response_kind, "bool");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_request_id() {
        let (ctx, _rx) = test_context("a");
        ctx.request_info_with_id::<String, bool>("fixed", &"x".to_string())
            .unwrap();
        let err = ctx
            .request_info_with_id::<String, bool>("fixed", &"y".to_string())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateRequest(_)));
    }

    #[test]
    fn test_local_state_is_per_executor() {
        let (ctx, _rx) = test_context("a");
        assert_eq!(ctx.local_state::<i64>().unwrap(), None);
        ctx.set_local_state(&5i64).unwrap();
        assert_eq!(ctx.local_state::<i64>().unwrap(), Some(5));
        assert_eq!(ctx.local_states.get("b"), None);
    }
}
