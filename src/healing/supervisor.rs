use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::{
    AuditSink, FailureClass, HealingDecision, HealingOutcome, HealingRecord, RecoveryStrategy,
};
use crate::config::{ConfigError, HealingConfig};
use crate::queue::{ExecutionResult, QueuedAction};

/// Classifies execution failures and decides how to recover
pub struct HealingSupervisor {
    config: HealingConfig,
    sink: Arc<dyn AuditSink>,
    history: Mutex<Vec<HealingRecord>>,
}

impl HealingSupervisor {
    /// Create a supervisor forwarding records to `sink`
    pub fn new(config: HealingConfig, sink: Arc<dyn AuditSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            history: Mutex::new(Vec::new()),
        })
    }

    /// Policy in effect
    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Failure class carried by an executor result.
    ///
    /// A failure without a label counts as transient.
    pub fn classify(&self, result: &ExecutionResult) -> FailureClass {
        result.failure_class.unwrap_or(FailureClass::Transient)
    }

    /// Decide what to do with `action` after a `class` failure on its
    /// current attempt, and record the decision.
    pub fn decide(&self, class: FailureClass, action: &QueuedAction) -> HealingDecision {
        let attempts_left = action.attempt < self.config.max_attempts;

        let (decision, strategy, outcome) = match class {
            FailureClass::Blocked => (
                HealingDecision::Abort,
                RecoveryStrategy::AbortQueue,
                HealingOutcome::Aborted,
            ),
            FailureClass::SessionExpired => (
                HealingDecision::Pause,
                RecoveryStrategy::PauseQueue,
                HealingOutcome::Paused,
            ),
            FailureClass::Transient if attempts_left => (
                HealingDecision::Retry(self.backoff_for(action.attempt)),
                RecoveryStrategy::Backoff,
                HealingOutcome::RetryScheduled,
            ),
            FailureClass::UiDrift if !action.recovery_attempted => (
                HealingDecision::RetryOnce,
                RecoveryStrategy::Renavigate,
                HealingOutcome::RetryScheduled,
            ),
            FailureClass::Transient | FailureClass::UiDrift => (
                HealingDecision::Isolate,
                RecoveryStrategy::None,
                HealingOutcome::Isolated,
            ),
        };

        match decision {
            _ if class.is_batch_fatal() => error!(
                action_id = %action.id,
                target_id = %action.target_id,
                attempt = action.attempt,
                failure_class = %class,
                decision = ?decision,
                "Batch-fatal failure, operator intervention required"
            ),
            HealingDecision::Isolate => warn!(
                action_id = %action.id,
                target_id = %action.target_id,
                attempt = action.attempt,
                failure_class = %class,
                "Giving up on action"
            ),
            _ => debug!(
                action_id = %action.id,
                attempt = action.attempt,
                failure_class = %class,
                decision = ?decision,
                "Healing decision"
            ),
        }

        self.append(action, class, strategy, outcome);
        decision
    }

    /// Record that a retry after healing succeeded
    pub fn record_recovery(&self, action: &QueuedAction, class: FailureClass) {
        let strategy = match class {
            FailureClass::UiDrift => RecoveryStrategy::Renavigate,
            _ => RecoveryStrategy::Backoff,
        };
        self.append(action, class, strategy, HealingOutcome::Recovered);
    }

    /// Exponential backoff before retrying after `attempt`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.config.base_backoff_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.config.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Every record produced so far, oldest first
    pub fn records(&self) -> Vec<HealingRecord> {
        self.history.lock().clone()
    }

    fn append(
        &self,
        action: &QueuedAction,
        class: FailureClass,
        strategy: RecoveryStrategy,
        outcome: HealingOutcome,
    ) {
        let record = HealingRecord {
            action_id: action.id,
            target_id: action.target_id.clone(),
            attempt: action.attempt,
            failure_class: class,
            strategy,
            outcome,
            recorded_at: Utc::now(),
        };
        self.sink.record(&record);
        self.history.lock().push(record);
    }
}

impl std::fmt::Debug for HealingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingSupervisor")
            .field("config", &self.config)
            .field("records", &self.history.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::MemoryAuditSink;
    use serde_json::json;

    fn supervisor() -> (HealingSupervisor, MemoryAuditSink) {
        let sink = MemoryAuditSink::new();
        let supervisor =
            HealingSupervisor::new(HealingConfig::default(), Arc::new(sink.clone())).unwrap();
        (supervisor, sink)
    }

    fn action_at(attempt: u32) -> QueuedAction {
        let mut action = QueuedAction::new("t1", json!({}));
        action.attempt = attempt;
        action
    }

    #[test]
    fn test_unlabelled_failure_is_transient() {
        let (supervisor, _) = supervisor();
        let result = ExecutionResult {
            success: false,
            failure_class: None,
            detail: None,
        };
        assert_eq!(supervisor.classify(&result), FailureClass::Transient);
        assert_eq!(
            supervisor.classify(&ExecutionResult::failed(FailureClass::Blocked, "captcha")),
            FailureClass::Blocked
        );
    }

    #[test]
    fn test_transient_backs_off_then_isolates() {
        let (supervisor, sink) = supervisor();

        assert_eq!(
            supervisor.decide(FailureClass::Transient, &action_at(1)),
            HealingDecision::Retry(Duration::from_millis(500))
        );
        assert_eq!(
            supervisor.decide(FailureClass::Transient, &action_at(2)),
            HealingDecision::Retry(Duration::from_millis(1_000))
        );
        assert_eq!(
            supervisor.decide(FailureClass::Transient, &action_at(3)),
            HealingDecision::Isolate
        );

        let outcomes: Vec<_> = sink.records().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                HealingOutcome::RetryScheduled,
                HealingOutcome::RetryScheduled,
                HealingOutcome::Isolated
            ]
        );
    }

    #[test]
    fn test_ui_drift_recovers_once() {
        let (supervisor, _) = supervisor();
        let mut action = action_at(1);

        assert_eq!(
            supervisor.decide(FailureClass::UiDrift, &action),
            HealingDecision::RetryOnce
        );

        action.attempt = 2;
        action.recovery_attempted = true;
        assert_eq!(
            supervisor.decide(FailureClass::UiDrift, &action),
            HealingDecision::Isolate
        );
    }

    #[test]
    fn test_fatal_classes() {
        let (supervisor, _) = supervisor();
        assert_eq!(
            supervisor.decide(FailureClass::SessionExpired, &action_at(1)),
            HealingDecision::Pause
        );
        assert_eq!(
            supervisor.decide(FailureClass::Blocked, &action_at(1)),
            HealingDecision::Abort
        );
        assert_eq!(supervisor.records().len(), 2);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = HealingConfig {
            max_attempts: 50,
            base_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4_000,
        };
        let supervisor = HealingSupervisor::new(config, Arc::new(MemoryAuditSink::new())).unwrap();

        assert_eq!(supervisor.backoff_for(4), Duration::from_millis(4_000));
        assert_eq!(supervisor.backoff_for(40), Duration::from_millis(4_000));
    }

    #[test]
    fn test_ui_drift_recovers_even_on_last_attempt() {
        let config = HealingConfig {
            max_attempts: 1,
            ..HealingConfig::default()
        };
        let supervisor = HealingSupervisor::new(config, Arc::new(MemoryAuditSink::new())).unwrap();
        let mut action = action_at(1);

        assert_eq!(
            supervisor.decide(FailureClass::UiDrift, &action),
            HealingDecision::RetryOnce
        );
        assert_eq!(
            supervisor.decide(FailureClass::Transient, &action),
            HealingDecision::Isolate
        );

        action.attempt = 2;
        action.recovery_attempted = true;
        assert_eq!(
            supervisor.decide(FailureClass::UiDrift, &action),
            HealingDecision::Isolate
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HealingConfig {
            max_attempts: 0,
            ..HealingConfig::default()
        };
        let result = HealingSupervisor::new(config, Arc::new(MemoryAuditSink::new()));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "healing.max_attempts", .. })
        ));
    }
}
