//! # Interaction Workflow Orchestrator
//!
//! A batch engine that walks an ordered list of targets, generates content for
//! each one, waits for a human to approve it and then dispatches an automation
//! step against a single shared automation resource.
//!
//! ## Overview
//!
//! The orchestrator is built from small, composable pieces:
//!
//! - [`progress`]: progress projection pushed to subscribers on every transition
//! - [`pacing`]: randomized, bounded delays between automated actions
//! - [`healing`]: failure classification and recovery decisions
//! - [`queue`]: FIFO, single-flight execution of dispatch actions
//! - [`workflow`]: the per-target human-in-the-loop state machine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orchestrator::config::OrchestratorConfig;
//! use orchestrator::healing::{HealingSupervisor, TracingAuditSink};
//! use orchestrator::pacing::PacingPolicy;
//! use orchestrator::queue::{ActionExecutor, ActionQueue, ExecutionResult, QueuedAction};
//! use orchestrator::workflow::{
//!     BatchWorkflowController, ContentGenerator, GeneratedContent, GenerationContext,
//!     GenerationError, Target,
//! };
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl ContentGenerator for Greeter {
//!     async fn generate(
//!         &self,
//!         target: &Target,
//!         _context: &GenerationContext,
//!     ) -> Result<GeneratedContent, GenerationError> {
//!         Ok(GeneratedContent::text(format!("Hello {}", target.label)))
//!     }
//! }
//!
//! struct Browser;
//!
//! #[async_trait::async_trait]
//! impl ActionExecutor for Browser {
//!     async fn execute(&self, _action: &QueuedAction) -> ExecutionResult {
//!         ExecutionResult::success()
//!     }
//! }
//!
//! # async fn example() -> orchestrator::Result<()> {
//! let config = OrchestratorConfig::default();
//! let supervisor = HealingSupervisor::new(config.healing.clone(), Arc::new(TracingAuditSink))?;
//! let queue = ActionQueue::new(
//!     Arc::new(Browser),
//!     PacingPolicy::new(config.pacing.clone())?,
//!     supervisor,
//!     config.queue.clone(),
//! )?;
//! let controller = BatchWorkflowController::new(Arc::new(Greeter), queue, config);
//!
//! controller.start(
//!     vec![Target::new("t1", "Ada"), Target::new("t2", "Grace")],
//!     Some(GenerationContext::default()),
//! )?;
//! let outcome = controller.wait_until_settled().await;
//! println!("completed {}", outcome.completed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Main error type for orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bad input to an operation; nothing was mutated
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not permitted in the current workflow state
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the controller was in
        state: workflow::WorkflowState,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Content generation error
    #[error("Generation error: {0}")]
    Generation(#[from] workflow::GenerationError),

    /// Action queue error
    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration with documented defaults
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Progress projection for observers
pub mod progress;

/// Randomized pacing between automated actions
pub mod pacing;

/// Failure classification and recovery
pub mod healing;

/// Single-flight action queue
pub mod queue;

/// Human-in-the-loop batch workflow controller
pub mod workflow;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = OrchestratorError::InvalidState {
            operation: "start",
            state: workflow::WorkflowState::Dispatching,
        };
        assert_eq!(err.to_string(), "Invalid state: cannot start while dispatching");
    }

    #[test]
    fn test_validation_message() {
        let err = OrchestratorError::Validation("no targets".to_string());
        assert_eq!(err.to_string(), "Validation error: no targets");
    }
}
