//! Request/response correlation for human-in-the-loop pauses
//!
//! A handler raises a request with [`WorkflowContext::request_info`]. The request is recorded as a
//! [`PendingRequest`] and announced with a `RequestInfo` event; when the run quiesces it ends in
//! `IdleWithPendingRequests`. The caller answers with `Workflow::send_responses`, keyed by request
//! id, and the runner delivers each answer to the executor named in [`PendingRequest::reply_to`].
//!
//! ```text
//!  superstep k            caller                    superstep k+1
//! ┌───────────────┐   RequestInfo{id}   ┌────────┐   response(id)   ┌──────────────────────┐
//! │ request_info  │ ──────────────────▶ │  ...   │ ───────────────▶ │ handle_response(req) │
//! └───────────────┘                     └────────┘                  └──────────────────────┘
//! ```
//!
//! [`WorkflowContext::request_info`]: crate::context::WorkflowContext::request_info

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::message::{Payload, ANY_KIND};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An outstanding request for outside information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: String,

    /// Executor that originally raised the request
    pub source_executor_id: String,

    /// Executor at this level that receives the response
    pub reply_to: String,

    pub payload: Payload,

    /// Kind given to the response payload when it is delivered
    pub response_kind: String,

    /// Wrapping sub-workflow executor ids, outermost first
    #[serde(default)]
    pub subworkflow_path: Vec<String>,
}

impl PendingRequest {
    pub fn new(
        request_id: impl Into<String>,
        source_executor_id: impl Into<String>,
        payload: Payload,
        response_kind: impl Into<String>,
    ) -> Self {
        let source_executor_id = source_executor_id.into();
        Self {
            request_id: request_id.into(),
            reply_to: source_executor_id.clone(),
            source_executor_id,
            payload,
            response_kind: response_kind.into(),
            subworkflow_path: Vec::new(),
        }
    }

    /// Source executor id prefixed by the sub-workflow path, e.g. `"wrapper/child"`.
    pub fn qualified_source(&self) -> String {
        let mut parts = self.subworkflow_path.clone();
        parts.push(self.source_executor_id.clone());
        parts.join("/")
    }

    /// Whether the request was raised inside a nested workflow.
    pub fn is_nested(&self) -> bool {
        !self.subworkflow_path.is_empty()
    }

    /// Wrap the response data in a payload of the expected kind.
    pub fn response_payload(&self, data: serde_json::Value) -> Payload {
        Payload::from_parts(self.response_kind.clone(), data)
    }
}

/// Pending requests of one run, shared by every handler context.
#[derive(Debug, Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<BTreeMap<String, PendingRequest>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; an id that is already pending is rejected.
    pub fn insert(&self, request: PendingRequest) -> Result<()> {
        let mut pending = self.inner.lock();
        if pending.contains_key(&request.request_id) {
            return Err(WorkflowError::DuplicateRequest(request.request_id));
        }
        pending.insert(request.request_id.clone(), request);
        Ok(())
    }

    pub fn get(&self, request_id: &str) -> Option<PendingRequest> {
        self.inner.lock().get(request_id).cloned()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.lock().contains_key(request_id)
    }

    pub fn remove(&self, request_id: &str) -> Option<PendingRequest> {
        self.inner.lock().remove(request_id)
    }

    /// Pending requests ordered by id.
    pub fn list(&self) -> Vec<PendingRequest> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Executor that turns every payload it receives into a request and forwards each response
/// downstream as an ordinary message.
pub struct RequestInfoExecutor {
    id: String,
    response_kind: String,
}

impl RequestInfoExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response_kind: ANY_KIND.to_string(),
        }
    }

    /// Kind given to responses before they are forwarded.
    pub fn with_response_kind(mut self, kind: impl Into<String>) -> Self {
        self.response_kind = kind.into();
        self
    }
}

#[async_trait]
impl Executor for RequestInfoExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_kinds(&self) -> Vec<String> {
        vec![ANY_KIND.to_string()]
    }

    fn output_kinds(&self) -> Vec<String> {
        vec![self.response_kind.clone()]
    }

    fn response_kinds(&self) -> Vec<String> {
        vec![self.response_kind.clone()]
    }

    async fn handle(&mut self, payload: Payload, ctx: WorkflowContext) -> Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        ctx.request_payload(request_id, payload, self.response_kind.clone())?;
        Ok(())
    }

    async fn handle_response(
        &mut self,
        _request: PendingRequest,
        response: Payload,
        ctx: WorkflowContext,
    ) -> Result<()> {
        ctx.send_payload(response, None);
        Ok(())
    }
}
