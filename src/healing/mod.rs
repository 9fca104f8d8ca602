//! Failure healing
//!
//! Executors label every failure with a [`FailureClass`]. The
//! [`HealingSupervisor`] turns that label and the action's attempt history
//! into a [`HealingDecision`] and appends a [`HealingRecord`] for each one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where healing records go
pub mod audit;
/// Retry and recovery decisions
pub mod supervisor;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use supervisor::HealingSupervisor;

/// Classification of an execution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Flaky network, slow page, timeout
    Transient,
    /// The page no longer looks the way the executor expects
    UiDrift,
    /// The automation session must be re-authenticated
    SessionExpired,
    /// The remote side blocked the account; stop everything
    Blocked,
}

impl FailureClass {
    /// Whether this class stops the whole batch
    pub fn is_batch_fatal(self) -> bool {
        matches!(self, FailureClass::SessionExpired | FailureClass::Blocked)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::UiDrift => "ui_drift",
            FailureClass::SessionExpired => "session_expired",
            FailureClass::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the queue should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingDecision {
    /// Wait, then execute again
    Retry(Duration),
    /// Run the executor's recovery step, then execute once more
    RetryOnce,
    /// Stop releasing actions until an operator resumes the queue
    Pause,
    /// Reject this and every pending action
    Abort,
    /// Give up on this action only; the batch continues
    Isolate,
}

/// Recovery strategy attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Exponential backoff then retry
    Backoff,
    /// Executor recovery step then a single retry
    Renavigate,
    /// Pause pending re-authentication
    PauseQueue,
    /// Abort the queue
    AbortQueue,
    /// No further recovery
    None,
}

/// Result of a healing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingOutcome {
    /// Another attempt was scheduled
    RetryScheduled,
    /// A retry after healing succeeded
    Recovered,
    /// The queue was paused
    Paused,
    /// The queue was aborted
    Aborted,
    /// The action failed permanently; the target is isolated
    Isolated,
}

/// Append-only audit entry for one healing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingRecord {
    /// Action being healed
    pub action_id: Uuid,
    /// Target the action belongs to
    pub target_id: String,
    /// Attempt that produced the failure (or the success, for `Recovered`)
    pub attempt: u32,
    /// Failure classification
    pub failure_class: FailureClass,
    /// Strategy applied
    pub strategy: RecoveryStrategy,
    /// Outcome of applying it
    pub outcome: HealingOutcome,
    /// When the record was produced
    pub recorded_at: DateTime<Utc>,
}
