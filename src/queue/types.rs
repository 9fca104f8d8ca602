use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::healing::FailureClass;

/// Lifecycle of a queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Waiting for its turn
    Pending,
    /// Currently driving the automation resource
    InFlight,
    /// Executed successfully
    Succeeded,
    /// Failed permanently
    Failed,
}

/// One dispatch against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Unique identifier
    pub id: Uuid,
    /// Target the action is aimed at
    pub target_id: String,
    /// Executor-specific payload, typically the approved content
    pub payload: serde_json::Value,
    /// Attempts made so far
    pub attempt: u32,
    /// Current status
    pub status: ActionStatus,
    /// Whether the executor's recovery step already ran for this action
    pub recovery_attempted: bool,
    /// When the action was created
    pub created_at: DateTime<Utc>,
}

impl QueuedAction {
    /// Create a pending action
    pub fn new(target_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            payload,
            attempt: 0,
            status: ActionStatus::Pending,
            recovery_attempted: false,
            created_at: Utc::now(),
        }
    }
}

/// Result of one executor call.
///
/// `detail` is for logs only and never reaches progress observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the action took effect
    pub success: bool,
    /// Failure label supplied by the executor
    pub failure_class: Option<FailureClass>,
    /// Raw diagnostics
    pub detail: Option<String>,
}

impl ExecutionResult {
    /// Successful execution
    pub fn success() -> Self {
        Self {
            success: true,
            failure_class: None,
            detail: None,
        }
    }

    /// Failed execution with an explicit class
    pub fn failed(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_class: Some(class),
            detail: Some(detail.into()),
        }
    }
}

/// Final report for an action that was not rejected by the queue
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Action in its terminal status
    pub action: QueuedAction,
    /// Class of the last failure when the action failed
    pub failure_class: Option<FailureClass>,
}

impl ExecutionReport {
    /// Whether the action succeeded
    pub fn succeeded(&self) -> bool {
        self.action.status == ActionStatus::Succeeded
    }
}

/// Errors surfaced by the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The session expired; the queue paused and waits for `resume`
    #[error("re-authentication required (target {target_id})")]
    SessionExpired {
        /// Action that hit the expiry
        action_id: Uuid,
        /// Its target
        target_id: String,
    },

    /// The remote side blocked automation; the queue aborted
    #[error("automation blocked (target {target_id})")]
    Blocked {
        /// Action that was blocked
        action_id: Uuid,
        /// Its target
        target_id: String,
    },

    /// The action was still pending when the queue aborted
    #[error("queue aborted before the action ran")]
    Aborted,

    /// The queue no longer accepts or runs actions
    #[error("queue is closed")]
    Closed,
}

/// The single shared automation capability
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform the action against its target
    async fn execute(&self, action: &QueuedAction) -> ExecutionResult;

    /// Bring the resource back to a known place after UI drift
    async fn recover(&self, _action: &QueuedAction) -> ExecutionResult {
        ExecutionResult::success()
    }
}
