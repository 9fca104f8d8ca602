//! Single-flight FIFO queue in front of the automation resource
//!
//! One worker task owns the [`ActionExecutor`]. Submissions are accepted
//! synchronously in `enqueue`, so their order is the order of the calls, and
//! the worker takes them one at a time: there is never more than one
//! execution in flight.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, warn};

use super::types::{
    ActionExecutor, ActionStatus, ExecutionReport, ExecutionResult, QueueError, QueuedAction,
};
use crate::config::{ConfigError, QueueConfig};
use crate::healing::{FailureClass, HealingDecision, HealingSupervisor};
use crate::pacing::PacingPolicy;

type Reply = Result<ExecutionReport, QueueError>;

struct Submission {
    action: QueuedAction,
    reply: oneshot::Sender<Reply>,
}

/// Whether the worker may release actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueControl {
    Running,
    Paused,
    Aborted,
    Closed,
}

struct QueueShared {
    control: watch::Sender<QueueControl>,
    pending: AtomicUsize,
    in_flight: AtomicBool,
    supervisor: Arc<HealingSupervisor>,
}

/// FIFO, single-concurrency action queue
pub struct ActionQueue {
    sender: mpsc::UnboundedSender<Submission>,
    shared: Arc<QueueShared>,
}

impl ActionQueue {
    /// Create the queue and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        pacing: PacingPolicy,
        supervisor: HealingSupervisor,
        config: QueueConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let (control, control_rx) = watch::channel(QueueControl::Running);

        let shared = Arc::new(QueueShared {
            control,
            pending: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            supervisor: Arc::new(supervisor),
        });

        let worker = Worker {
            executor,
            pacing,
            config,
            shared: shared.clone(),
            receiver,
            control: control_rx,
            release_at: None,
        };
        tokio::spawn(worker.run());

        Ok(Self { sender, shared })
    }

    /// Submit an action. The returned future resolves once the action
    /// reaches a terminal status or is rejected.
    pub fn enqueue(&self, mut action: QueuedAction) -> BoxFuture<'static, Reply> {
        action.status = ActionStatus::Pending;
        let (reply, response) = oneshot::channel();

        let control = *self.shared.control.borrow();
        let accepted = match control {
            QueueControl::Aborted | QueueControl::Closed => Err(QueueError::Closed),
            QueueControl::Running | QueueControl::Paused => Ok(()),
        }
        .and_then(|()| {
            debug!(action_id = %action.id, target_id = %action.target_id, "Action enqueued");
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            self.sender.send(Submission { action, reply }).map_err(|_| {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                QueueError::Closed
            })
        });

        async move {
            accepted?;
            response.await.unwrap_or(Err(QueueError::Closed))
        }
        .boxed()
    }

    /// Release actions again after a session-expiry pause.
    ///
    /// Returns `false` if the queue was not paused.
    pub fn resume(&self) -> bool {
        let resumed = self.shared.control.send_if_modified(|control| {
            if *control == QueueControl::Paused {
                *control = QueueControl::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            info!("Action queue resumed");
        }
        resumed
    }

    /// Stop accepting actions and reject everything still pending
    pub fn shutdown(&self) {
        self.shared.control.send_if_modified(|control| {
            if *control == QueueControl::Closed {
                false
            } else {
                *control = QueueControl::Closed;
                true
            }
        });
    }

    /// Whether the queue is waiting for `resume`
    pub fn is_paused(&self) -> bool {
        *self.shared.control.borrow() == QueueControl::Paused
    }

    /// Whether a blocking failure aborted the queue
    pub fn is_aborted(&self) -> bool {
        *self.shared.control.borrow() == QueueControl::Aborted
    }

    /// Actions accepted but not yet taken by the worker
    pub fn pending_len(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Whether the executor is being driven right now
    pub fn in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Supervisor consulted on failures
    pub fn supervisor(&self) -> &Arc<HealingSupervisor> {
        &self.shared.supervisor
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("control", &*self.shared.control.borrow())
            .field("pending", &self.pending_len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

struct Worker {
    executor: Arc<dyn ActionExecutor>,
    pacing: PacingPolicy,
    config: QueueConfig,
    shared: Arc<QueueShared>,
    receiver: mpsc::UnboundedReceiver<Submission>,
    control: watch::Receiver<QueueControl>,
    release_at: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(submission) = self.receiver.recv().await {
            if let Err(rejection) = self.wait_until_runnable().await {
                self.reject(submission, rejection);
                continue;
            }

            if let Some(release_at) = self.release_at.take() {
                time::sleep_until(release_at).await;
            }
            // The pacing wait may have overlapped an abort or shutdown
            if let Err(rejection) = self.wait_until_runnable().await {
                self.reject(submission, rejection);
                continue;
            }

            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            let reply = self.process(submission.action).await;
            self.release_at = Some(Instant::now() + self.pacing.next_delay());

            let aborted = matches!(reply, Err(QueueError::Blocked { .. }));
            let _ = submission.reply.send(reply);

            if aborted {
                while let Ok(pending) = self.receiver.try_recv() {
                    self.reject(pending, QueueError::Aborted);
                }
            }
        }
        debug!("Action queue worker stopped");
    }

    /// Wait out a pause without polling
    async fn wait_until_runnable(&mut self) -> Result<(), QueueError> {
        loop {
            let control = *self.control.borrow_and_update();
            match control {
                QueueControl::Running => return Ok(()),
                QueueControl::Aborted => return Err(QueueError::Aborted),
                QueueControl::Closed => return Err(QueueError::Closed),
                QueueControl::Paused => {
                    debug!("Queue paused, waiting for resume");
                    if self.control.changed().await.is_err() {
                        return Err(QueueError::Closed);
                    }
                }
            }
        }
    }

    fn reject(&self, submission: Submission, error: QueueError) {
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        debug!(action_id = %submission.action.id, error = %error, "Action rejected");
        let _ = submission.reply.send(Err(error));
    }

    #[instrument(skip_all, fields(action_id = %action.id, target_id = %action.target_id))]
    async fn process(&self, mut action: QueuedAction) -> Reply {
        let supervisor = &self.shared.supervisor;
        let mut healed_from: Option<FailureClass> = None;

        loop {
            action.attempt += 1;
            action.status = ActionStatus::InFlight;
            debug!(attempt = action.attempt, "Executing action");

            let result = self.drive(|| self.executor.execute(&action)).await;

            if result.success {
                action.status = ActionStatus::Succeeded;
                if let Some(class) = healed_from {
                    supervisor.record_recovery(&action, class);
                }
                info!(attempt = action.attempt, "Action succeeded");
                return Ok(ExecutionReport {
                    action,
                    failure_class: None,
                });
            }

            let class = supervisor.classify(&result);
            debug!(
                attempt = action.attempt,
                failure_class = %class,
                detail = ?result.detail,
                "Action failed"
            );

            match supervisor.decide(class, &action) {
                HealingDecision::Retry(backoff) => {
                    healed_from = Some(class);
                    action.status = ActionStatus::Pending;
                    time::sleep(backoff).await;
                }
                HealingDecision::RetryOnce => {
                    healed_from = Some(class);
                    action.recovery_attempted = true;
                    action.status = ActionStatus::Pending;
                    let recovery = self.drive(|| self.executor.recover(&action)).await;
                    if !recovery.success {
                        warn!(detail = ?recovery.detail, "Recovery step failed, retrying anyway");
                    }
                }
                HealingDecision::Pause => {
                    action.status = ActionStatus::Failed;
                    self.shared.control.send_replace(QueueControl::Paused);
                    warn!("Session expired, queue paused until resumed");
                    return Err(QueueError::SessionExpired {
                        action_id: action.id,
                        target_id: action.target_id,
                    });
                }
                HealingDecision::Abort => {
                    action.status = ActionStatus::Failed;
                    self.shared.control.send_replace(QueueControl::Aborted);
                    return Err(QueueError::Blocked {
                        action_id: action.id,
                        target_id: action.target_id,
                    });
                }
                HealingDecision::Isolate => {
                    action.status = ActionStatus::Failed;
                    return Ok(ExecutionReport {
                        action,
                        failure_class: Some(class),
                    });
                }
            }
        }
    }

    /// Run one call against the resource under the execution timeout
    async fn drive<'a, F>(&'a self, call: F) -> ExecutionResult
    where
        F: FnOnce() -> BoxFuture<'a, ExecutionResult>,
    {
        self.shared.in_flight.store(true, Ordering::SeqCst);
        let outcome = time::timeout(self.config.execution_timeout(), call()).await;
        self.shared.in_flight.store(false, Ordering::SeqCst);

        outcome.unwrap_or_else(|_| {
            warn!(
                timeout_ms = self.config.execution_timeout_ms,
                "Executor call timed out"
            );
            ExecutionResult::failed(FailureClass::Transient, "execution timed out")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealingConfig;
    use crate::healing::MemoryAuditSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct Scripted {
        results: Mutex<VecDeque<ExecutionResult>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionExecutor for Scripted {
        async fn execute(&self, _action: &QueuedAction) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(ExecutionResult::success)
        }
    }

    fn queue_with(executor: Arc<Scripted>) -> ActionQueue {
        let healing = HealingConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10,
        };
        ActionQueue::new(
            executor,
            PacingPolicy::disabled(),
            HealingSupervisor::new(healing, Arc::new(MemoryAuditSink::new())).unwrap(),
            QueueConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_report() {
        let executor = Scripted::new(vec![]);
        let queue = queue_with(executor.clone());

        let report = queue.enqueue(QueuedAction::new("t1", json!({}))).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.action.attempt, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_retry_then_success_is_recorded() {
        let executor = Scripted::new(vec![ExecutionResult::failed(
            FailureClass::Transient,
            "socket reset",
        )]);
        let queue = queue_with(executor.clone());

        let report = queue.enqueue(QueuedAction::new("t1", json!({}))).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.action.attempt, 2);
        let records = queue.supervisor().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].outcome, crate::healing::HealingOutcome::Recovered);
    }

    #[tokio::test]
    async fn test_enqueue_after_abort_is_closed() {
        let executor = Scripted::new(vec![ExecutionResult::failed(FailureClass::Blocked, "ban")]);
        let queue = queue_with(executor);

        let first = queue.enqueue(QueuedAction::new("t1", json!({}))).await;
        assert!(matches!(first, Err(QueueError::Blocked { .. })));
        assert!(queue.is_aborted());

        let second = queue.enqueue(QueuedAction::new("t2", json!({}))).await;
        assert_eq!(second, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let queue = queue_with(Scripted::new(vec![]));
        queue.shutdown();
        let result = queue.enqueue(QueuedAction::new("t1", json!({}))).await;
        assert_eq!(result, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_resume_only_when_paused() {
        let queue = queue_with(Scripted::new(vec![]));
        assert!(!queue.resume());
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let result = ActionQueue::new(
            Scripted::new(vec![]),
            PacingPolicy::disabled(),
            HealingSupervisor::new(HealingConfig::default(), Arc::new(MemoryAuditSink::new()))
                .unwrap(),
            QueueConfig {
                execution_timeout_ms: 0,
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "queue.execution_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_counters_settle_after_completion() {
        tokio_test::block_on(async {
            let queue = queue_with(Scripted::new(vec![]));
            let pending = queue.enqueue(QueuedAction::new("t1", json!({})));
            assert_eq!(queue.pending_len(), 1);

            pending.await.unwrap();
            assert_eq!(queue.pending_len(), 0);
            assert!(!queue.in_flight());
        });
    }
}
