use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::progress::ProgressSnapshot;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// No batch has been started
    Idle,
    /// Content is being generated for the current target
    Generating,
    /// Waiting for the operator to approve, skip or stop
    AwaitingApproval,
    /// The approved action is in the queue
    Dispatching,
    /// Stop requested; waiting for in-flight work to settle
    Stopping,
    /// The batch is over
    Completed,
    /// The batch needs operator attention
    Error,
}

impl WorkflowState {
    /// Whether the batch has settled
    pub fn is_settled(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Error)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Generating => "generating",
            WorkflowState::AwaitingApproval => "awaiting_approval",
            WorkflowState::Dispatching => "dispatching",
            WorkflowState::Stopping => "stopping",
            WorkflowState::Completed => "completed",
            WorkflowState::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entity processed by the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Opaque identifier
    pub id: String,
    /// Display label for progress reporting
    pub label: String,
    /// Input handed to the content generator
    pub input: serde_json::Value,
}

impl Target {
    /// Target with an empty generation input
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            input: serde_json::Value::Null,
        }
    }

    /// Attach generation input
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }
}

/// Batch-wide input shared by every generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Free-form context (templates, tone, sender profile, ...)
    pub data: serde_json::Value,
}

impl GenerationContext {
    /// Wrap a context value
    pub fn new(data: serde_json::Value) -> Self {
        Self { data }
    }
}

/// Content produced for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// The text shown to the operator and dispatched on approval
    pub body: String,
    /// Generator-specific extras
    pub metadata: serde_json::Value,
}

impl GeneratedContent {
    /// Plain text content
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Content generation failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The generator could not produce content
    #[error("generation failed: {0}")]
    Failed(String),

    /// The generator is not reachable
    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

/// Produces personalized content for a target
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate content for `target`
    async fn generate(
        &self,
        target: &Target,
        context: &GenerationContext,
    ) -> Result<GeneratedContent, GenerationError>;
}

/// Everything the operator needs to make a decision
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    /// Target awaiting approval
    pub target: Target,
    /// Content that will be dispatched
    pub content: GeneratedContent,
    /// Progress at the time of the request
    pub progress: ProgressSnapshot,
}

/// Receives approval requests; the operator answers through the controller
pub trait ApprovalGateway: Send + Sync {
    /// Present `request` to the operator. Must not block.
    fn request_approval(&self, request: ApprovalRequest);
}

/// Kind of failure reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Content generation failed after its retry
    GenerationFailed,
    /// The automation session needs re-authentication
    SessionExpired,
    /// Automation was blocked
    Blocked,
    /// The action queue is closed or aborted
    QueueUnavailable,
}

impl FailureKind {
    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::GenerationFailed => "generation_failed",
            FailureKind::SessionExpired => "session_expired",
            FailureKind::Blocked => "blocked",
            FailureKind::QueueUnavailable => "queue_unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-visible failure: a kind and a target, nothing else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// What went wrong
    pub kind: FailureKind,
    /// Where it went wrong
    pub target_id: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on target {}", self.kind, self.target_id)
    }
}

/// Per-target tallies for a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Dispatched successfully
    pub completed: usize,
    /// Failed generation or dispatch
    pub failed: usize,
    /// Skipped by the operator
    pub skipped: usize,
    /// Never finished because the batch stopped or errored first
    pub not_processed: usize,
    /// The operator stopped the batch
    pub stopped_early: bool,
}

impl BatchOutcome {
    /// Targets with a final per-target result
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

/// State of one batch run
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Run identifier
    pub id: Uuid,
    /// Targets in processing order
    pub targets: Vec<Target>,
    /// Index of the current target
    pub current_index: usize,
    /// Controller state
    pub state: WorkflowState,
    /// Content generated so far, by target id
    pub generated_content: HashMap<String, GeneratedContent>,
    /// Set by `stop()`; never cleared
    pub cancellation_requested: bool,
    /// Tallies
    pub outcome: BatchOutcome,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Failure that put the run into `Error`, if any
    pub last_failure: Option<BatchFailure>,
}

impl BatchRun {
    pub(crate) fn new(targets: Vec<Target>) -> Self {
        Self {
            id: Uuid::new_v4(),
            targets,
            current_index: 0,
            state: WorkflowState::Generating,
            generated_content: HashMap::new(),
            cancellation_requested: false,
            outcome: BatchOutcome::default(),
            started_at: Utc::now(),
            last_failure: None,
        }
    }

    /// Target at `current_index`
    pub fn current_target(&self) -> Option<&Target> {
        self.targets.get(self.current_index)
    }

    /// Whether the current target is the last one
    pub fn is_last(&self) -> bool {
        self.current_index + 1 >= self.targets.len()
    }
}
