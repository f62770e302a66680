//! Executor contract and closure-based executors
//!
//! An [`Executor`] is a graph node: a stable id, a set of accepted payload kinds, and async
//! handlers. Executors own their local state; the runner only reaches it through the
//! [`snapshot_state`](Executor::snapshot_state) / [`restore_state`](Executor::restore_state)
//! hooks, which exchange plain JSON.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::{FunctionExecutor, WorkflowContext};
//!
//! let upper = FunctionExecutor::new("upper")
//!     .on::<String, _, _>(|text, ctx: WorkflowContext| async move {
//!         ctx.send_message(&text.to_uppercase())
//!     })
//!     .with_output::<String>();
//! ```

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::message::{kind_accepts, MessageData, Payload};
use crate::request::PendingRequest;
use crate::subworkflow::SubWorkflowResponseMessage;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait Executor: Send + Sync {
    fn id(&self) -> &str;

    /// Payload kinds this executor has handlers for.
    fn input_kinds(&self) -> Vec<String>;

    /// Kinds this executor sends. Empty means undeclared.
    fn output_kinds(&self) -> Vec<String> {
        Vec::new()
    }

    /// Request kinds this executor has response handlers for.
    fn response_kinds(&self) -> Vec<String> {
        Vec::new()
    }

    fn can_handle(&self, kind: &str) -> bool {
        self.input_kinds().iter().any(|h| kind_accepts(h, kind))
    }

    async fn handle(&mut self, payload: Payload, ctx: WorkflowContext) -> Result<()>;

    /// Handle the response to a request this executor raised or forwarded.
    async fn handle_response(
        &mut self,
        request: PendingRequest,
        _response: Payload,
        _ctx: WorkflowContext,
    ) -> Result<()> {
        Err(WorkflowError::NoResponseHandler {
            executor_id: self.id().to_string(),
            kind: request.payload.kind,
        })
    }

    /// Local state to persist in a checkpoint. `None` falls back to the context state slot.
    /// An error fails the checkpoint.
    async fn snapshot_state(&self) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Restore state produced by [`snapshot_state`](Self::snapshot_state). `Ok(false)` hands the
    /// value to the context state slot instead; an error rejects the checkpoint as corrupt.
    async fn restore_state(&mut self, _state: Value) -> Result<bool> {
        Ok(false)
    }
}

type HandlerFn = Arc<dyn Fn(Payload, WorkflowContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type ResponseFn = Arc<
    dyn Fn(PendingRequest, Payload, WorkflowContext) -> BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

/// Executor built from closures, one per payload kind.
pub struct FunctionExecutor {
    id: String,
    handlers: Vec<(String, HandlerFn)>,
    response_handlers: Vec<(String, ResponseFn)>,
    fallback_response: Option<ResponseFn>,
    output_kinds: Vec<String>,
}

impl FunctionExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handlers: Vec::new(),
            response_handlers: Vec::new(),
            fallback_response: None,
            output_kinds: Vec::new(),
        }
    }

    /// Register a handler for payloads of kind `T::kind()`.
    pub fn on<T, F, Fut>(self, handler: F) -> Self
    where
        T: MessageData,
        F: Fn(T, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on_payload(T::kind(), move |payload, ctx| {
            let handler = handler.clone();
            async move {
                let value = payload.decode::<T>()?;
                handler(value, ctx).await
            }
        })
    }

    /// Register a handler that receives the raw payload.
    pub fn on_payload<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Payload, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind = kind.into();
        let handler: HandlerFn = Arc::new(
            move |payload: Payload, ctx: WorkflowContext| -> BoxFuture<'static, Result<()>> {
                Box::pin(handler(payload, ctx))
            },
        );
        if let Some(existing) = self.handlers.iter_mut().find(|(k, _)| *k == kind) {
            tracing::warn!(executor = %self.id, kind = %kind, "Replacing existing handler");
            existing.1 = handler;
        } else {
            self.handlers.push((kind, handler));
        }
        self
    }

    /// Register a handler for responses to requests of kind `Req::kind()`.
    pub fn on_response<Req, Resp, F, Fut>(mut self, handler: F) -> Self
    where
        Req: MessageData,
        Resp: MessageData,
        F: Fn(Req, Resp, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind = Req::kind();
        let handler = Arc::new(handler);
        let wrapped: ResponseFn = Arc::new(
            move |request: PendingRequest,
                  response: Payload,
                  ctx: WorkflowContext|
                  -> BoxFuture<'static, Result<()>> {
                let handler = handler.clone();
                Box::pin(async move {
                    let original = request.payload.decode::<Req>()?;
                    let answer = response.decode::<Resp>()?;
                    handler(original, answer, ctx).await
                })
            },
        );

        if let Some(existing) = self.response_handlers.iter_mut().find(|(k, _)| *k == kind) {
            tracing::warn!(executor = %self.id, kind = %kind, "Replacing existing response handler");
            existing.1 = wrapped;
        } else {
            self.response_handlers.push((kind, wrapped));
        }
        self
    }

    /// Handle responses no typed response handler matches.
    pub fn on_any_response<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PendingRequest, Payload, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.fallback_response = Some(Arc::new(
            move |request: PendingRequest,
                  response: Payload,
                  ctx: WorkflowContext|
                  -> BoxFuture<'static, Result<()>> {
                Box::pin(handler(request, response, ctx))
            },
        ));
        self
    }

    /// Relay responses of forwarded sub-workflow requests back to the wrapping executor.
    pub fn relay_subworkflow_responses(self) -> Self {
        self.on_any_response(|request, response, ctx| async move {
            let Some(wrapper) = request.subworkflow_path.first().cloned() else {
                return Err(WorkflowError::NoResponseHandler {
                    executor_id: ctx.executor_id().to_string(),
                    kind: request.payload.kind,
                });
            };
            let relay = SubWorkflowResponseMessage::for_request(&request, response.data);
            ctx.send_message_to(&relay, &wrapper)
        })
    }

    /// Declare a kind this executor sends.
    pub fn with_output<T: MessageData>(mut self) -> Self {
        let kind = T::kind();
        if !self.output_kinds.contains(&kind) {
            self.output_kinds.push(kind);
        }
        self
    }

    /// Exact kind match first, then the first accepting handler in registration order.
    fn handler_for(&self, kind: &str) -> Option<&HandlerFn> {
        self.handlers
            .iter()
            .find(|(k, _)| k == kind)
            .or_else(|| self.handlers.iter().find(|(k, _)| kind_accepts(k, kind)))
            .map(|(_, h)| h)
    }

    fn response_handler_for(&self, kind: &str) -> Option<&ResponseFn> {
        self.response_handlers
            .iter()
            .find(|(k, _)| k == kind)
            .or_else(|| {
                self.response_handlers
                    .iter()
                    .find(|(k, _)| kind_accepts(k, kind))
            })
            .map(|(_, h)| h)
            .or(self.fallback_response.as_ref())
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_kinds(&self) -> Vec<String> {
        self.handlers.iter().map(|(k, _)| k.clone()).collect()
    }

    fn output_kinds(&self) -> Vec<String> {
        self.output_kinds.clone()
    }

    fn response_kinds(&self) -> Vec<String> {
        self.response_handlers.iter().map(|(k, _)| k.clone()).collect()
    }

    async fn handle(&mut self, payload: Payload, ctx: WorkflowContext) -> Result<()> {
        let handler = self
            .handler_for(&payload.kind)
            .cloned()
            .ok_or_else(|| WorkflowError::UnhandledMessage {
                executor_id: self.id.clone(),
                kind: payload.kind.clone(),
            })?;
        handler(payload, ctx).await
    }

    async fn handle_response(
        &mut self,
        request: PendingRequest,
        response: Payload,
        ctx: WorkflowContext,
    ) -> Result<()> {
        let handler = self
            .response_handler_for(&request.payload.kind)
            .cloned()
            .ok_or_else(|| WorkflowError::NoResponseHandler {
                executor_id: self.id.clone(),
                kind: request.payload.kind.clone(),
            })?;
        handler(request, response, ctx).await
    }
}

impl std::fmt::Debug for FunctionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExecutor")
            .field("id", &self.id)
            .field("input_kinds", &self.input_kinds())
            .field("output_kinds", &self.output_kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use crate::events::WorkflowEvent;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let mut executor = FunctionExecutor::new("e")
            .on::<String, _, _>(|s, ctx| async move { ctx.send_message(&s.len().to_string()) })
            .on::<i64, _, _>(|n, ctx| async move { ctx.send_message(&(n * 2)) });

        assert!(executor.can_handle("string"));
        assert!(executor.can_handle("int"));
        assert!(!executor.can_handle("bool"));

        let (ctx, _rx) = test_context("e");
        executor
            .handle(Payload::new(&21i64).unwrap(), ctx.clone())
            .await
            .unwrap();
        let sent = ctx.take_messages();
        assert_eq!(sent[0].payload.decode::<i64>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_any_handler_is_a_fallback() {
        let mut executor = FunctionExecutor::new("e")
            .on::<Value, _, _>(|_, ctx| async move { ctx.send_message(&"any".to_string()) })
            .on::<bool, _, _>(|_, ctx| async move { ctx.send_message(&"bool".to_string()) });

        let (ctx, _rx) = test_context("e");
        executor
            .handle(Payload::new(&true).unwrap(), ctx.clone())
            .await
            .unwrap();
        executor
            .handle(Payload::new(&1i64).unwrap(), ctx.clone())
            .await
            .unwrap();

        let sent: Vec<String> = ctx
            .take_messages()
            .iter()
            .map(|m| m.payload.decode().unwrap())
            .collect();
        assert_eq!(sent, vec!["bool", "any"]);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut executor = FunctionExecutor::new("e")
            .on::<i64, _, _>(|_, ctx| async move { ctx.send_message(&1i64) })
            .on::<i64, _, _>(|_, ctx| async move { ctx.send_message(&2i64) });

        assert_eq!(executor.input_kinds(), vec!["int"]);
        let (ctx, _rx) = test_context("e");
        executor
            .handle(Payload::new(&0i64).unwrap(), ctx.clone())
            .await
            .unwrap();
        assert_eq!(ctx.take_messages()[0].payload.data, json!(2));
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_an_error() {
        let mut executor = FunctionExecutor::new("e").on::<i64, _, _>(|_, _| async { Ok(()) });
        let (ctx, _rx) = test_context("e");

        let err = executor
            .handle(Payload::new(&"x".to_string()).unwrap(), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnhandledMessage { kind, .. } if kind == "string"));
    }

    #[tokio::test]
    async fn test_response_handler_receives_original_request() {
        let mut executor = FunctionExecutor::new("e").on_response::<String, bool, _, _>(
            |question, answer, ctx| async move {
                ctx.yield_output(&format!("{} -> {}", question, answer))
            },
        );
        assert_eq!(executor.response_kinds(), vec!["string"]);

        let (ctx, mut rx) = test_context("e");
        let request = PendingRequest::new(
            "r1",
            "e",
            Payload::new(&"ship it?".to_string()).unwrap(),
            "bool",
        );
        let response = request.response_payload(json!(true));
        executor
            .handle_response(request, response, ctx)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            WorkflowEvent::Output { data, .. } => {
                assert_eq!(data.decode::<String>().unwrap(), "ship it? -> true")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_response_handler() {
        let mut executor = FunctionExecutor::new("e");
        let (ctx, _rx) = test_context("e");
        let request = PendingRequest::new("r1", "e", Payload::new(&1i64).unwrap(), "bool");

        let err = executor
            .handle_response(request, Payload::new(&true).unwrap(), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NoResponseHandler { .. }));
    }

    #[tokio::test]
    async fn test_relay_subworkflow_responses() {
        let mut executor = FunctionExecutor::new("parent").relay_subworkflow_responses();
        let (ctx, _rx) = test_context("parent");

        let mut request = PendingRequest::new("r1", "child", Payload::new(&1i64).unwrap(), "bool");
        request.subworkflow_path = vec!["wrapper".to_string()];
        request.reply_to = "parent".to_string();

        executor
            .handle_response(request, Payload::new(&true).unwrap(), ctx.clone())
            .await
            .unwrap();

        let sent = ctx.take_messages();
        assert_eq!(sent[0].target_id.as_deref(), Some("wrapper"));
        let relay = sent[0].payload.decode::<SubWorkflowResponseMessage>().unwrap();
        assert_eq!(relay.request_id, "r1");
        assert_eq!(relay.executor_id, "wrapper");
        assert_eq!(relay.data, json!(true));
    }
}
