use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::HealingRecord;

/// Destination for healing records
pub trait AuditSink: Send + Sync {
    /// Persist or forward one record
    fn record(&self, record: &HealingRecord);
}

/// Sink that writes each record as a structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &HealingRecord) {
        info!(
            action_id = %record.action_id,
            target_id = %record.target_id,
            attempt = record.attempt,
            failure_class = %record.failure_class,
            strategy = ?record.strategy,
            outcome = ?record.outcome,
            "Healing record"
        );
    }
}

/// Sink that keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<HealingRecord>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn records(&self) -> Vec<HealingRecord> {
        self.records.lock().clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &HealingRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::{FailureClass, HealingOutcome, RecoveryStrategy};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_memory_sink_shares_storage_across_clones() {
        let sink = MemoryAuditSink::new();
        let handle = sink.clone();

        sink.record(&HealingRecord {
            action_id: Uuid::new_v4(),
            target_id: "t1".to_string(),
            attempt: 1,
            failure_class: FailureClass::Transient,
            strategy: RecoveryStrategy::Backoff,
            outcome: HealingOutcome::RetryScheduled,
            recorded_at: Utc::now(),
        });

        assert_eq!(handle.len(), 1);
        assert_eq!(handle.records()[0].target_id, "t1");
    }
}
