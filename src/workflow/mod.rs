//! Human-in-the-loop batch workflow
//!
//! [`BatchWorkflowController`] walks the targets of a batch one at a time:
//! generate content, wait for the operator, dispatch through the
//! [`ActionQueue`](crate::queue::ActionQueue), then advance.
//!
//! ```text
//! Idle --start--> Generating --content--> AwaitingApproval --approve--> Dispatching
//!                     |                        |                           |
//!                     | failed twice           | skip                      | done / isolated
//!                     v                        v                           v
//!                   Error --skip-->       next target or Completed <-------+
//! ```

pub mod controller;
/// Batch, target and approval types
pub mod types;

pub use controller::{BatchWorkflowController, REAUTH_REQUIRED, STOPPED_EARLY};
pub use types::{
    ApprovalGateway, ApprovalRequest, BatchFailure, BatchOutcome, BatchRun, ContentGenerator,
    FailureKind, GeneratedContent, GenerationContext, GenerationError, Target, WorkflowState,
};
