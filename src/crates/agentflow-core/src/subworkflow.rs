//! Sub-workflow composition
//!
//! [`WorkflowExecutor`] embeds a whole [`Workflow`] as a single executor. Parent and child never
//! hold references to each other; they talk only through two message kinds:
//!
//! ```text
//!  parent graph                                      nested workflow
//! ┌─────────────┐  SubWorkflowRequestMessage   ┌──────────────────────┐
//! │ interceptor │ ◀──────────────────────────  │ WorkflowExecutor     │
//! │             │  SubWorkflowResponseMessage  │   └─ Workflow        │
//! │             │ ───────────────────────────▶ │        └─ child ...  │
//! └─────────────┘                              └──────────────────────┘
//! ```
//!
//! A request raised inside the nested workflow surfaces in the parent as a
//! [`SubWorkflowRequestMessage`] whose request path starts with the wrapper id. A parent
//! executor either answers it from local knowledge with
//! [`create_response`](SubWorkflowRequestMessage::create_response) or escalates it with
//! [`WorkflowContext::forward_request`]. With
//! [`with_request_propagation`](WorkflowExecutor::with_request_propagation) the wrapper raises
//! nested requests as its own and no interceptor is needed.
//!
//! The wrapper collects responses until every outstanding nested request is answered, then
//! injects them into the nested workflow in one `send_responses` call. Inputs that arrive while
//! nested requests are outstanding are queued and run, in arrival order, once the nested workflow
//! is idle again, so a surfaced request is never orphaned.

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::events::{WorkflowEvent, WorkflowRunResult};
use crate::executor::Executor;
use crate::message::{MessageData, Payload};
use crate::message_kind;
use crate::request::PendingRequest;
use crate::workflow::Workflow;
use agentflow_checkpoint::WorkflowCheckpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A request raised inside a nested workflow, sent to the parent graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowRequestMessage {
    pub request: PendingRequest,
    /// Id of the wrapping executor
    pub executor_id: String,
}

impl SubWorkflowRequestMessage {
    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn payload(&self) -> &Payload {
        &self.request.payload
    }

    /// Decode the nested request payload.
    pub fn decode<T: MessageData>(&self) -> Result<T> {
        self.request.payload.decode()
    }

    /// Answer the request locally.
    pub fn create_response<T: MessageData>(&self, data: &T) -> Result<SubWorkflowResponseMessage> {
        Ok(SubWorkflowResponseMessage {
            request_id: self.request.request_id.clone(),
            executor_id: self.executor_id.clone(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// A response routed back to the wrapping executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowResponseMessage {
    pub request_id: String,
    pub executor_id: String,
    pub data: Value,
}

impl SubWorkflowResponseMessage {
    /// Relay the answer to a forwarded request back to the wrapper that surfaced it.
    pub fn for_request(request: &PendingRequest, data: Value) -> Self {
        let executor_id = request
            .subworkflow_path
            .first()
            .cloned()
            .unwrap_or_else(|| request.reply_to.clone());
        Self {
            request_id: request.request_id.clone(),
            executor_id,
            data,
        }
    }
}

message_kind!(SubWorkflowRequestMessage, "sub_workflow_request");
message_kind!(SubWorkflowResponseMessage, "sub_workflow_response");

#[derive(Serialize, Deserialize)]
struct WrapperState {
    checkpoint: WorkflowCheckpoint,
    outstanding: BTreeMap<String, PendingRequest>,
    collected: BTreeMap<String, Value>,
    #[serde(default)]
    queued: VecDeque<Payload>,
}

/// Runs a nested workflow as one executor of the parent graph.
pub struct WorkflowExecutor {
    id: String,
    workflow: Workflow,
    propagate_requests: bool,
    input_kinds: Vec<String>,
    /// Nested requests surfaced to the parent and not yet injected, by request id
    outstanding: BTreeMap<String, PendingRequest>,
    collected: BTreeMap<String, Value>,
    /// Inputs waiting for the nested workflow to become idle
    queued: VecDeque<Payload>,
}

impl WorkflowExecutor {
    pub fn new(id: impl Into<String>, workflow: Workflow) -> Self {
        let mut input_kinds = workflow.input_kinds();
        input_kinds.push(SubWorkflowResponseMessage::kind());
        Self {
            id: id.into(),
            workflow,
            propagate_requests: false,
            input_kinds,
            outstanding: BTreeMap::new(),
            collected: BTreeMap::new(),
            queued: VecDeque::new(),
        }
    }

    /// Raise nested requests as this executor's own requests instead of sending
    /// [`SubWorkflowRequestMessage`]s.
    pub fn with_request_propagation(mut self, enabled: bool) -> Self {
        self.propagate_requests = enabled;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Ids of nested requests still waiting for an answer.
    pub fn outstanding_requests(&self) -> Vec<String> {
        self.outstanding.keys().cloned().collect()
    }

    /// Number of inputs waiting for the nested workflow to become idle.
    pub fn queued_inputs(&self) -> usize {
        self.queued.len()
    }

    async fn collect_response(
        &mut self,
        request_id: String,
        data: Value,
        ctx: &WorkflowContext,
    ) -> Result<()> {
        if !self.outstanding.contains_key(&request_id) {
            return Err(WorkflowError::UnknownRequest(request_id));
        }
        self.collected.insert(request_id, data);

        if self.collected.len() < self.outstanding.len() {
            tracing::debug!(
                executor = %self.id,
                collected = self.collected.len(),
                outstanding = self.outstanding.len(),
                "Waiting for remaining nested responses"
            );
            return Ok(());
        }

        let responses: HashMap<String, Value> = std::mem::take(&mut self.collected)
            .into_iter()
            .collect();
        for id in responses.keys() {
            self.outstanding.remove(id);
        }
        let result = self.workflow.send_responses(responses).await?;
        self.surface(result, ctx)?;
        self.drain_queued(ctx).await
    }

    /// Start queued inputs while the nested workflow has nothing outstanding.
    async fn drain_queued(&mut self, ctx: &WorkflowContext) -> Result<()> {
        while self.outstanding.is_empty() {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            tracing::debug!(
                executor = %self.id,
                remaining = self.queued.len(),
                "Starting queued input"
            );
            let result = self.workflow.run_payload(payload).await?;
            self.surface(result, ctx)?;
        }
        Ok(())
    }

    /// Turn nested outputs into outgoing messages and nested requests into parent requests.
    fn surface(&mut self, result: WorkflowRunResult, ctx: &WorkflowContext) -> Result<()> {
        for event in result.into_events() {
            match event {
                WorkflowEvent::Output { data, .. } => ctx.send_payload(data, None),
                WorkflowEvent::RequestInfo { request } => {
                    self.outstanding
                        .insert(request.request_id.clone(), request.clone());

                    let mut surfaced = request;
                    surfaced.subworkflow_path.insert(0, self.id.clone());
                    surfaced.reply_to = self.id.clone();

                    if self.propagate_requests {
                        ctx.raise_request(surfaced)?;
                    } else {
                        ctx.send_message(&SubWorkflowRequestMessage {
                            request: surfaced,
                            executor_id: self.id.clone(),
                        })?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for WorkflowExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_kinds(&self) -> Vec<String> {
        self.input_kinds.clone()
    }

    async fn handle(&mut self, payload: Payload, ctx: WorkflowContext) -> Result<()> {
        if payload.kind == SubWorkflowResponseMessage::kind() {
            let response: SubWorkflowResponseMessage = payload.decode()?;
            if response.executor_id != self.id {
                tracing::warn!(
                    executor = %self.id,
                    addressed_to = %response.executor_id,
                    request_id = %response.request_id,
                    "Response addressed to another sub-workflow"
                );
                return Err(WorkflowError::UnknownRequest(response.request_id));
            }
            return self
                .collect_response(response.request_id, response.data, &ctx)
                .await;
        }

        if !self.outstanding.is_empty() {
            tracing::debug!(
                executor = %self.id,
                outstanding = self.outstanding.len(),
                "Nested workflow is waiting for responses, queueing input"
            );
            self.queued.push_back(payload);
            return Ok(());
        }

        self.queued.push_back(payload);
        self.drain_queued(&ctx).await
    }

    async fn handle_response(
        &mut self,
        request: PendingRequest,
        response: Payload,
        ctx: WorkflowContext,
    ) -> Result<()> {
        self.collect_response(request.request_id, response.data, &ctx)
            .await
    }

    async fn snapshot_state(&self) -> Result<Option<Value>> {
        let state = WrapperState {
            checkpoint: self.workflow.snapshot(HashMap::new()).await?,
            outstanding: self.outstanding.clone(),
            collected: self.collected.clone(),
            queued: self.queued.clone(),
        };
        Ok(Some(serde_json::to_value(state)?))
    }

    async fn restore_state(&mut self, state: Value) -> Result<bool> {
        let state: WrapperState = serde_json::from_value(state)?;
        self.workflow.restore_checkpoint(&state.checkpoint).await?;
        self.outstanding = state.outstanding;
        self.collected = state.collected;
        self.queued = state.queued;
        tracing::debug!(
            executor = %self.id,
            outstanding = self.outstanding.len(),
            queued = self.queued.len(),
            "Restored nested workflow"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use serde_json::json;

    fn nested_request() -> PendingRequest {
        let mut request = PendingRequest::new(
            "r1",
            "lookup",
            Payload::new(&"example.com".to_string()).unwrap(),
            "string",
        );
        request.subworkflow_path = vec!["wrapper".into()];
        request.reply_to = "wrapper".into();
        request
    }

    #[test]
    fn test_create_response_targets_wrapper() {
        let message = SubWorkflowRequestMessage {
            request: nested_request(),
            executor_id: "wrapper".into(),
        };
        assert_eq!(message.request_id(), "r1");
        assert_eq!(message.decode::<String>().unwrap(), "example.com");

        let response = message.create_response(&"93.184.216.34".to_string()).unwrap();
        assert_eq!(response.request_id, "r1");
        assert_eq!(response.executor_id, "wrapper");
        assert_eq!(response.data, json!("93.184.216.34"));
    }

    #[test]
    fn test_for_request_uses_outermost_wrapper() {
        let mut request = nested_request();
        request.subworkflow_path = vec!["outer".into(), "inner".into()];
        request.reply_to = "interceptor".into();

        let response = SubWorkflowResponseMessage::for_request(&request, json!(1));
        assert_eq!(response.executor_id, "outer");
        assert_eq!(response.request_id, "r1");
    }

    #[test]
    fn test_message_kinds() {
        assert_eq!(SubWorkflowRequestMessage::kind(), "sub_workflow_request");
        assert_eq!(SubWorkflowResponseMessage::kind(), "sub_workflow_response");
    }

    fn asking_wrapper() -> WorkflowExecutor {
        let ask = crate::executor::FunctionExecutor::new("ask")
            .on::<String, _, _>(|question, ctx| async move {
                ctx.request_info::<String, String>(&question)?;
                Ok(())
            })
            .on_response::<String, String, _, _>(|_, answer, ctx| async move {
                ctx.yield_output(&answer)
            });
        let mut builder = crate::builder::WorkflowBuilder::new();
        builder.add_executor(ask).set_start_executor("ask");
        WorkflowExecutor::new("wrapper", builder.build().unwrap())
    }

    #[tokio::test]
    async fn test_response_for_other_wrapper_is_rejected() {
        let mut wrapper = asking_wrapper();
        let (ctx, _rx) = test_context("wrapper");

        let misrouted = SubWorkflowResponseMessage {
            request_id: "r1".into(),
            executor_id: "elsewhere".into(),
            data: json!("x"),
        };
        let err = wrapper
            .handle(Payload::new(&misrouted).unwrap(), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownRequest(ref id) if id == "r1"));
    }

    #[tokio::test]
    async fn test_input_waits_while_requests_are_outstanding() {
        let mut wrapper = asking_wrapper();
        let (ctx, _rx) = test_context("wrapper");

        wrapper
            .handle(Payload::new(&"first?".to_string()).unwrap(), ctx.clone())
            .await
            .unwrap();
        wrapper
            .handle(Payload::new(&"second?".to_string()).unwrap(), ctx.clone())
            .await
            .unwrap();

        assert_eq!(wrapper.outstanding_requests().len(), 1);
        assert_eq!(wrapper.queued_inputs(), 1);
        let surfaced = ctx.take_messages();
        assert_eq!(surfaced.len(), 1);
        let first: SubWorkflowRequestMessage = surfaced[0].payload.decode().unwrap();
        assert_eq!(first.decode::<String>().unwrap(), "first?");

        // Answering the first request starts the queued input
        let answer = first.create_response(&"yes".to_string()).unwrap();
        wrapper
            .handle(Payload::new(&answer).unwrap(), ctx.clone())
            .await
            .unwrap();
        assert_eq!(wrapper.queued_inputs(), 0);
        assert_eq!(wrapper.outstanding_requests().len(), 1);
        let surfaced = ctx.take_messages();
        assert_eq!(surfaced.len(), 2);
        assert_eq!(surfaced[0].payload.decode::<String>().unwrap(), "yes");
        let second: SubWorkflowRequestMessage = surfaced[1].payload.decode().unwrap();
        assert_eq!(second.decode::<String>().unwrap(), "second?");
    }

    #[tokio::test]
    async fn test_restore_rejects_malformed_state() {
        let mut wrapper = asking_wrapper();
        let err = wrapper
            .restore_state(json!({ "garbage": true }))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Serialization(_)));
    }
}
