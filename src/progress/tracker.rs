use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowState;

/// Read-only view of batch progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Number of targets in the batch
    pub total: usize,
    /// Targets that reached a final per-target outcome
    pub completed: usize,
    /// Zero-based index of the target being worked on
    pub current_index: usize,
    /// Display label of the current target
    pub current_target_label: Option<String>,
    /// Controller state at the time of the snapshot
    pub current_status: WorkflowState,
    /// Operator-facing message, if any
    pub message: Option<String>,
    /// Increases with every mutation; lets observers drop stale snapshots
    pub sequence: u64,
}

/// Pure progress state holder
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    current_index: usize,
    current_label: Option<String>,
    status: WorkflowState,
    message: Option<String>,
    sequence: u64,
}

impl ProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            total: 0,
            completed: 0,
            current_index: 0,
            current_label: None,
            status: WorkflowState::Idle,
            message: None,
            sequence: 0,
        }
    }

    /// Start tracking a batch of `total` targets
    pub fn initialize(&mut self, total: usize) {
        self.total = total;
        self.completed = 0;
        self.current_index = 0;
        self.current_label = None;
        self.status = WorkflowState::Idle;
        self.message = None;
        self.bump();
    }

    /// Point the tracker at a target and state
    pub fn update(&mut self, index: usize, label: Option<&str>, status: WorkflowState) {
        self.current_index = index;
        self.current_label = label.map(str::to_string);
        self.status = status;
        self.bump();
    }

    /// Count one more target as finished
    pub fn record_processed(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
        self.bump();
    }

    /// Replace the operator-facing message
    pub fn set_message(&mut self, message: Option<String>) {
        self.message = message;
        self.bump();
    }

    /// Return to the empty state. The sequence keeps counting.
    pub fn reset(&mut self) {
        let sequence = self.sequence;
        *self = Self::new();
        self.sequence = sequence;
        self.bump();
    }

    /// Current projection
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            current_index: self.current_index,
            current_target_label: self.current_label.clone(),
            current_status: self.status,
            message: self.message.clone(),
            sequence: self.sequence,
        }
    }

    fn bump(&mut self) {
        self.sequence += 1;
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_and_update() {
        let mut tracker = ProgressTracker::new();
        tracker.initialize(3);
        tracker.update(1, Some("Grace"), WorkflowState::AwaitingApproval);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.current_target_label.as_deref(), Some("Grace"));
        assert_eq!(snapshot.current_status, WorkflowState::AwaitingApproval);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let mut tracker = ProgressTracker::new();
        tracker.initialize(1);
        tracker.record_processed();
        tracker.record_processed();
        assert_eq!(tracker.snapshot().completed, 1);
    }

    #[test]
    fn test_sequence_survives_reset() {
        let mut tracker = ProgressTracker::new();
        tracker.initialize(2);
        tracker.set_message(Some("hello".to_string()));
        let before = tracker.snapshot().sequence;

        tracker.reset();
        let after = tracker.snapshot();

        assert!(after.sequence > before);
        assert_eq!(after.total, 0);
        assert!(after.message.is_none());
    }
}
