//! Approval requests
//!
//! Approvals are ordinary requests with fixed message kinds: raise one with
//! [`WorkflowContext::request_approval`](crate::context::WorkflowContext::request_approval) and
//! handle the decision with an `on_response::<ApprovalRequest, ApprovalResponse>` handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message_kind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// What is about to happen
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

impl ApprovalRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

message_kind!(ApprovalRequest, "approval_request");
message_kind!(ApprovalResponse, "approval_response");
