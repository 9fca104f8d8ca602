//! Action queue guarding the shared automation resource

pub mod action_queue;
pub mod types;

pub use action_queue::ActionQueue;
pub use types::{
    ActionExecutor, ActionStatus, ExecutionReport, ExecutionResult, QueueError, QueuedAction,
};
