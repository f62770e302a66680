//! Observable workflow events
//!
//! Every run produces an ordered sequence of [`WorkflowEvent`]s. Streaming APIs hand them out as
//! they happen; the non-streaming APIs collect them into a [`WorkflowRunResult`].
//!
//! A typical run that pauses on a request looks like this:
//!
//! ```text
//! Started
//! Status(Started)
//! Status(InProgress)
//! SuperstepStarted(1)
//!   ExecutorInvoked(reviewer)
//!   RequestInfo(request)
//!   ExecutorCompleted(reviewer)
//! SuperstepCompleted(1)
//! Status(InProgressPendingRequests)
//! Status(IdleWithPendingRequests)
//! ```
//!
//! Within one superstep, events of a single executor are in causal order. Events of executors
//! running concurrently in the same superstep may interleave.

use crate::error::Result;
use crate::message::{MessageData, Payload};
use crate::request::PendingRequest;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Runner status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunState {
    Started,
    InProgress,
    InProgressPendingRequests,
    Idle,
    IdleWithPendingRequests,
    Failed,
}

impl WorkflowRunState {
    /// The run has nothing left to execute.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::IdleWithPendingRequests)
    }

    pub fn has_pending_requests(self) -> bool {
        matches!(
            self,
            Self::InProgressPendingRequests | Self::IdleWithPendingRequests
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run, resume or response injection began
    Started { workflow_id: String },

    Status { state: WorkflowRunState },

    SuperstepStarted { iteration: usize },

    SuperstepCompleted { iteration: usize },

    ExecutorInvoked { executor_id: String },

    ExecutorCompleted { executor_id: String },

    ExecutorFailed { executor_id: String, error: String },

    /// A request is waiting for a response
    RequestInfo { request: PendingRequest },

    /// A value yielded as workflow output
    Output { executor_id: String, data: Payload },

    /// Application-defined event
    Custom { executor_id: String, data: Value },

    /// The run failed; no further events follow except the final status
    Failed { details: String },
}

impl WorkflowEvent {
    pub fn status(&self) -> Option<WorkflowRunState> {
        match self {
            Self::Status { state } => Some(*state),
            _ => None,
        }
    }
}

/// Event fan-out for one invocation: forwards to the live stream and keeps the history.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
    history: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self {
            tx,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn emit(&self, event: WorkflowEvent) {
        self.history.lock().push(event.clone());
        // The receiver is gone only when the caller dropped the stream.
        let _ = self.tx.send(event);
    }

    pub(crate) fn history(&self) -> Vec<WorkflowEvent> {
        self.history.lock().clone()
    }
}

/// Events of one completed invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowRunResult {
    events: Vec<WorkflowEvent>,
}

impl WorkflowRunResult {
    pub fn new(events: Vec<WorkflowEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<WorkflowEvent> {
        self.events
    }

    /// Yielded outputs in emission order.
    pub fn outputs(&self) -> Vec<&Payload> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::Output { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Outputs assignable to `T`, decoded.
    pub fn get_outputs<T: MessageData>(&self) -> Result<Vec<T>> {
        self.outputs()
            .into_iter()
            .filter(|p| p.is::<T>())
            .map(|p| p.decode::<T>())
            .collect()
    }

    pub fn request_info_events(&self) -> Vec<&PendingRequest> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::RequestInfo { request } => Some(request),
                _ => None,
            })
            .collect()
    }

    /// Last reported status.
    pub fn final_state(&self) -> Option<WorkflowRunState> {
        self.events.iter().rev().find_map(WorkflowEvent::status)
    }

    pub fn status_timeline(&self) -> Vec<WorkflowRunState> {
        self.events.iter().filter_map(WorkflowEvent::status).collect()
    }
}
