//! Batch workflow controller
//!
//! A per-target state machine driven entirely by callbacks: generation
//! completions, queue completions and explicit operator calls. Nothing
//! polls. All state sits behind one mutex that is released before any
//! subscriber, gateway or spawned task runs.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::types::{
    ApprovalGateway, ApprovalRequest, BatchFailure, BatchOutcome, BatchRun, ContentGenerator,
    FailureKind, GeneratedContent, GenerationContext, GenerationError, Target, WorkflowState,
};
use crate::config::OrchestratorConfig;
use crate::progress::{ProgressSnapshot, ProgressSubscribers, ProgressTracker, Subscription};
use crate::queue::{ActionQueue, ExecutionReport, QueueError, QueuedAction};
use crate::{OrchestratorError, Result};

/// Progress message shown while the session needs re-authentication
pub const REAUTH_REQUIRED: &str = "re-authentication required";

/// Progress message shown after an operator stop
pub const STOPPED_EARLY: &str = "stopped early";

type DispatchFuture = BoxFuture<'static, std::result::Result<ExecutionReport, QueueError>>;

enum Effect {
    Generate {
        run_id: Uuid,
        index: usize,
        target: Target,
        context: GenerationContext,
    },
    Dispatch {
        run_id: Uuid,
        index: usize,
        completion: DispatchFuture,
    },
    RequestApproval(ApprovalRequest),
}

/// Snapshots to publish and work to start once the lock is released
#[derive(Default)]
struct Transition {
    snapshots: Vec<ProgressSnapshot>,
    effects: Vec<Effect>,
}

struct RunSlot {
    run: Option<BatchRun>,
    context: Option<GenerationContext>,
    tracker: ProgressTracker,
    last_outcome: Option<BatchOutcome>,
}

impl RunSlot {
    fn state(&self) -> WorkflowState {
        self.run
            .as_ref()
            .map(|run| run.state)
            .unwrap_or(WorkflowState::Idle)
    }

    fn last_failure_kind(&self) -> Option<FailureKind> {
        self.run
            .as_ref()
            .and_then(|run| run.last_failure.as_ref())
            .map(|failure| failure.kind)
    }

    fn current_target_id(&self) -> Option<String> {
        self.run
            .as_ref()
            .and_then(BatchRun::current_target)
            .map(|target| target.id.clone())
    }

    fn is_current(&self, run_id: Uuid, index: usize) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.id == run_id && run.current_index == index)
    }

    fn enter(
        &mut self,
        state: WorkflowState,
        notify: &watch::Sender<WorkflowState>,
        tx: &mut Transition,
    ) {
        if let Some(run) = self.run.as_mut() {
            run.state = state;
            let label = run.targets.get(run.current_index).map(|t| t.label.as_str());
            self.tracker.update(run.current_index, label, state);
            debug!(batch_id = %run.id, index = run.current_index, state = %state, "Workflow transition");
        }
        notify.send_replace(state);
        tx.snapshots.push(self.tracker.snapshot());
    }

    fn generate_effect(&self) -> Option<Effect> {
        let run = self.run.as_ref()?;
        Some(Effect::Generate {
            run_id: run.id,
            index: run.current_index,
            target: run.current_target()?.clone(),
            context: self.context.clone()?,
        })
    }

    fn approval_effect(&self) -> Option<Effect> {
        let run = self.run.as_ref()?;
        let target = run.current_target()?;
        let content = run.generated_content.get(&target.id)?;
        Some(Effect::RequestApproval(ApprovalRequest {
            target: target.clone(),
            content: content.clone(),
            progress: self.tracker.snapshot(),
        }))
    }

    fn dispatch_action(&self) -> Option<QueuedAction> {
        let run = self.run.as_ref()?;
        let target = run.current_target()?;
        let content = run.generated_content.get(&target.id)?;
        Some(QueuedAction::new(
            target.id.clone(),
            json!({
                "target_id": target.id,
                "label": target.label,
                "content": content.body,
                "metadata": content.metadata,
            }),
        ))
    }

    /// Tally a final per-target result
    fn record(&mut self, tally: impl FnOnce(&mut BatchOutcome)) {
        if let Some(run) = self.run.as_mut() {
            tally(&mut run.outcome);
            self.tracker.record_processed();
        }
    }

    /// Move past a target that has its final result
    fn advance(&mut self, notify: &watch::Sender<WorkflowState>, tx: &mut Transition) {
        let (cancelled, last) = match self.run.as_ref() {
            Some(run) => (run.cancellation_requested, run.is_last()),
            None => return,
        };

        if cancelled || last {
            self.settle(cancelled, notify, tx);
            return;
        }

        if let Some(run) = self.run.as_mut() {
            run.current_index += 1;
        }
        self.enter(WorkflowState::Generating, notify, tx);
        tx.effects.extend(self.generate_effect());
    }

    fn settle(
        &mut self,
        stopped_early: bool,
        notify: &watch::Sender<WorkflowState>,
        tx: &mut Transition,
    ) {
        if let Some(run) = self.run.as_mut() {
            run.outcome.stopped_early = stopped_early;
            run.outcome.not_processed = run.targets.len().saturating_sub(run.outcome.processed());
            info!(
                batch_id = %run.id,
                completed = run.outcome.completed,
                failed = run.outcome.failed,
                skipped = run.outcome.skipped,
                not_processed = run.outcome.not_processed,
                stopped_early = stopped_early,
                "Batch settled"
            );
            self.last_outcome = Some(run.outcome.clone());
        }
        if stopped_early {
            self.tracker.set_message(Some(STOPPED_EARLY.to_string()));
        }
        self.enter(WorkflowState::Completed, notify, tx);
    }

    fn fail(
        &mut self,
        kind: FailureKind,
        notify: &watch::Sender<WorkflowState>,
        tx: &mut Transition,
    ) {
        let Some(target_id) = self.current_target_id() else {
            return;
        };
        let failure = BatchFailure { kind, target_id };
        let message = match kind {
            FailureKind::SessionExpired => REAUTH_REQUIRED.to_string(),
            _ => failure.to_string(),
        };

        if let Some(run) = self.run.as_mut() {
            run.outcome.not_processed = run.targets.len().saturating_sub(run.outcome.processed());
            error!(batch_id = %run.id, failure = %failure, "Batch needs operator attention");
            run.last_failure = Some(failure);
        }
        self.tracker.set_message(Some(message));
        self.enter(WorkflowState::Error, notify, tx);
    }
}

struct ControllerInner {
    generator: Arc<dyn ContentGenerator>,
    queue: ActionQueue,
    gateway: RwLock<Option<Arc<dyn ApprovalGateway>>>,
    config: OrchestratorConfig,
    slot: Mutex<RunSlot>,
    subscribers: ProgressSubscribers,
    state: watch::Sender<WorkflowState>,
}

/// Top-level human-in-the-loop batch controller.
///
/// Cheap to clone; clones share the same run. Must be used from within a
/// Tokio runtime because transitions spawn generation and dispatch tasks.
#[derive(Clone)]
pub struct BatchWorkflowController {
    inner: Arc<ControllerInner>,
}

impl BatchWorkflowController {
    /// Create a controller owning `queue` for its whole lifetime
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        queue: ActionQueue,
        config: OrchestratorConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkflowState::Idle);
        Self {
            inner: Arc::new(ControllerInner {
                generator,
                queue,
                gateway: RwLock::new(None),
                config,
                slot: Mutex::new(RunSlot {
                    run: None,
                    context: None,
                    tracker: ProgressTracker::new(),
                    last_outcome: None,
                }),
                subscribers: ProgressSubscribers::new(),
                state,
            }),
        }
    }

    /// Route approval requests to `gateway`
    pub fn set_approval_gateway(&self, gateway: Arc<dyn ApprovalGateway>) {
        *self.inner.gateway.write() = Some(gateway);
    }

    /// Start a batch. Fails without touching any state when the input is
    /// invalid or a batch is still running.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub fn start(&self, targets: Vec<Target>, context: Option<GenerationContext>) -> Result<Uuid> {
        let context = context.ok_or_else(|| {
            OrchestratorError::Validation("generation context is required".to_string())
        })?;
        validate_targets(&targets)?;

        let mut tx = Transition::default();
        let run_id = {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            let state = slot.state();
            if !matches!(state, WorkflowState::Idle | WorkflowState::Completed) {
                return Err(OrchestratorError::InvalidState {
                    operation: "start",
                    state,
                });
            }

            let run = BatchRun::new(targets);
            let run_id = run.id;
            info!(batch_id = %run_id, total = run.targets.len(), "Starting batch");

            slot.tracker.initialize(run.targets.len());
            slot.context = Some(context);
            slot.run = Some(run);
            slot.enter(WorkflowState::Generating, &self.inner.state, &mut tx);
            tx.effects.extend(slot.generate_effect());
            run_id
        };

        self.apply(tx);
        Ok(run_id)
    }

    /// Approve the current target's content and dispatch it.
    ///
    /// Ignored outside `AwaitingApproval`; returns whether it took effect.
    pub fn approve(&self) -> bool {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            let state = slot.state();
            if state != WorkflowState::AwaitingApproval {
                debug!(state = %state, "approve() ignored");
                return false;
            }
            let (Some(action), Some(run)) = (slot.dispatch_action(), slot.run.as_ref()) else {
                return false;
            };
            let (run_id, index) = (run.id, run.current_index);
            info!(batch_id = %run_id, target_id = %action.target_id, "Target approved");

            // Submitted under the lock so a concurrent stop() sees it as in flight
            let completion = self.inner.queue.enqueue(action);
            slot.enter(WorkflowState::Dispatching, &self.inner.state, &mut tx);
            tx.effects.push(Effect::Dispatch {
                run_id,
                index,
                completion,
            });
        }

        self.apply(tx);
        true
    }

    /// Skip the current target.
    ///
    /// Valid in `AwaitingApproval`, and in `Error` after a generation
    /// failure, where the target is counted as failed. Ignored elsewhere.
    pub fn skip(&self) -> bool {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;
            let target_id = slot.current_target_id().unwrap_or_default();

            match (slot.state(), slot.last_failure_kind()) {
                (WorkflowState::AwaitingApproval, _) => {
                    info!(target_id = %target_id, "Target skipped");
                    slot.record(|outcome| outcome.skipped += 1);
                }
                (WorkflowState::Error, Some(FailureKind::GenerationFailed)) => {
                    info!(target_id = %target_id, "Skipping target after generation failure");
                    if let Some(run) = slot.run.as_mut() {
                        run.last_failure = None;
                    }
                    slot.tracker.set_message(None);
                    slot.record(|outcome| outcome.failed += 1);
                }
                (state, _) => {
                    debug!(state = %state, "skip() ignored");
                    return false;
                }
            }
            slot.advance(&self.inner.state, &mut tx);
        }

        self.apply(tx);
        true
    }

    /// Request a stop.
    ///
    /// In-flight generation or dispatch is allowed to finish; the batch then
    /// settles as `Completed` with `stopped_early`. Idempotent; returns
    /// whether this call changed anything.
    pub fn stop(&self) -> bool {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            let state = slot.state();
            let failure = slot.last_failure_kind();
            let stoppable = match state {
                WorkflowState::Generating
                | WorkflowState::AwaitingApproval
                | WorkflowState::Dispatching => true,
                WorkflowState::Error => matches!(
                    failure,
                    Some(FailureKind::GenerationFailed | FailureKind::SessionExpired)
                ),
                WorkflowState::Idle | WorkflowState::Stopping | WorkflowState::Completed => false,
            };
            if !stoppable {
                debug!(state = %state, "stop() had nothing to do");
                return false;
            }

            if let Some(run) = slot.run.as_mut() {
                run.cancellation_requested = true;
                info!(batch_id = %run.id, state = %state, "Stop requested");
            }
            slot.enter(WorkflowState::Stopping, &self.inner.state, &mut tx);

            match state {
                WorkflowState::AwaitingApproval => {
                    slot.settle(true, &self.inner.state, &mut tx);
                }
                WorkflowState::Error => {
                    slot.record(|outcome| outcome.failed += 1);
                    slot.settle(true, &self.inner.state, &mut tx);
                    if failure == Some(FailureKind::SessionExpired) {
                        self.release_paused_queue();
                    }
                }
                _ => {}
            }
        }

        self.apply(tx);
        true
    }

    /// Continue after the operator re-authenticated the automation session.
    ///
    /// Only valid in `Error` caused by an expired session. Resumes the queue
    /// and asks for approval of the same target again; nothing is retried
    /// automatically.
    pub fn resume_after_reauth(&self) -> bool {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            if slot.state() != WorkflowState::Error
                || slot.last_failure_kind() != Some(FailureKind::SessionExpired)
            {
                return false;
            }

            if !self.inner.queue.resume() {
                warn!("Action queue was not paused");
            }
            if let Some(run) = slot.run.as_mut() {
                run.last_failure = None;
                info!(batch_id = %run.id, index = run.current_index, "Resuming after re-authentication");
            }
            slot.tracker.set_message(None);
            slot.enter(WorkflowState::AwaitingApproval, &self.inner.state, &mut tx);
            tx.effects.extend(slot.approval_effect());
        }

        self.apply(tx);
        true
    }

    /// Register a progress observer
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    /// Current controller state
    pub fn current_state(&self) -> WorkflowState {
        self.inner.slot.lock().state()
    }

    /// Index of the current target, if a batch exists
    pub fn current_index(&self) -> Option<usize> {
        self.inner
            .slot
            .lock()
            .run
            .as_ref()
            .map(|run| run.current_index)
    }

    /// Identifier of the current or last run
    pub fn run_id(&self) -> Option<Uuid> {
        self.inner.slot.lock().run.as_ref().map(|run| run.id)
    }

    /// Latest progress projection
    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.slot.lock().tracker.snapshot()
    }

    /// Tallies of the current or last run
    pub fn outcome(&self) -> Option<BatchOutcome> {
        self.inner.slot.lock().run.as_ref().map(|run| {
            let mut outcome = run.outcome.clone();
            outcome.not_processed = run.targets.len().saturating_sub(outcome.processed());
            outcome
        })
    }

    /// Outcome archived when the last run reached `Completed`
    pub fn last_outcome(&self) -> Option<BatchOutcome> {
        self.inner.slot.lock().last_outcome.clone()
    }

    /// Failure that put the run into `Error`
    pub fn last_failure(&self) -> Option<BatchFailure> {
        self.inner
            .slot
            .lock()
            .run
            .as_ref()
            .and_then(|run| run.last_failure.clone())
    }

    /// Whether `stop()` was called on the current run
    pub fn cancellation_requested(&self) -> bool {
        self.inner
            .slot
            .lock()
            .run
            .as_ref()
            .is_some_and(|run| run.cancellation_requested)
    }

    /// Content generated for `target_id` in the current run
    pub fn content_for(&self, target_id: &str) -> Option<GeneratedContent> {
        self.inner
            .slot
            .lock()
            .run
            .as_ref()
            .and_then(|run| run.generated_content.get(target_id).cloned())
    }

    /// Queue driving the automation resource
    pub fn queue(&self) -> &ActionQueue {
        &self.inner.queue
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<WorkflowState> {
        self.inner.state.subscribe()
    }

    /// Wait until the run is `Completed` or in `Error`, then return its
    /// tallies. Never resolves if no batch was started.
    pub async fn wait_until_settled(&self) -> BatchOutcome {
        let mut state = self.inner.state.subscribe();
        if state.wait_for(|s| s.is_settled()).await.is_err() {
            warn!("State channel closed before the batch settled");
        }
        self.outcome().unwrap_or_default()
    }

    /// A settled run must not leave the queue paused for the next one. If the
    /// session is still expired, the next dispatch pauses it again.
    fn release_paused_queue(&self) {
        if self.inner.queue.resume() {
            info!("Released queue paused by a stopped run");
        }
    }

    fn apply(&self, tx: Transition) {
        for snapshot in &tx.snapshots {
            self.inner.subscribers.publish(snapshot);
        }

        for effect in tx.effects {
            match effect {
                Effect::Generate {
                    run_id,
                    index,
                    target,
                    context,
                } => self.spawn_generation(run_id, index, target, context),
                Effect::Dispatch {
                    run_id,
                    index,
                    completion,
                } => self.spawn_dispatch(run_id, index, completion),
                Effect::RequestApproval(request) => {
                    let gateway = self.inner.gateway.read().clone();
                    if let Some(gateway) = gateway {
                        gateway.request_approval(request);
                    }
                }
            }
        }
    }

    fn spawn_generation(
        &self,
        run_id: Uuid,
        index: usize,
        target: Target,
        context: GenerationContext,
    ) {
        let controller = self.clone();
        let generator = self.inner.generator.clone();
        let retries = self.inner.config.generation.retries;

        tokio::spawn(async move {
            let result = generate_with_retry(generator.as_ref(), &target, &context, retries).await;
            controller.on_generation_finished(run_id, index, result);
        });
    }

    fn spawn_dispatch(&self, run_id: Uuid, index: usize, completion: DispatchFuture) {
        let controller = self.clone();
        tokio::spawn(async move {
            let result = completion.await;
            controller.on_dispatch_finished(run_id, index, result);
        });
    }

    fn on_generation_finished(
        &self,
        run_id: Uuid,
        index: usize,
        result: std::result::Result<GeneratedContent, GenerationError>,
    ) {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            if !slot.is_current(run_id, index) {
                debug!(batch_id = %run_id, index, "Discarding stale generation result");
                return;
            }

            match (slot.state(), result) {
                (WorkflowState::Stopping, _) => {
                    slot.settle(true, &self.inner.state, &mut tx);
                }
                (WorkflowState::Generating, Ok(content)) => {
                    if let (Some(target_id), Some(run)) =
                        (slot.current_target_id(), slot.run.as_mut())
                    {
                        run.generated_content.insert(target_id, content);
                    }
                    slot.enter(WorkflowState::AwaitingApproval, &self.inner.state, &mut tx);
                    tx.effects.extend(slot.approval_effect());
                }
                (WorkflowState::Generating, Err(e)) => {
                    warn!(
                        target_id = %slot.current_target_id().unwrap_or_default(),
                        error = %e,
                        "Content generation failed after retry"
                    );
                    slot.fail(FailureKind::GenerationFailed, &self.inner.state, &mut tx);
                }
                (state, _) => {
                    debug!(state = %state, "Generation result arrived in unexpected state");
                    return;
                }
            }
        }

        self.apply(tx);
    }

    fn on_dispatch_finished(
        &self,
        run_id: Uuid,
        index: usize,
        result: std::result::Result<ExecutionReport, QueueError>,
    ) {
        let mut tx = Transition::default();
        {
            let mut guard = self.inner.slot.lock();
            let slot = &mut *guard;

            let state = slot.state();
            if !slot.is_current(run_id, index)
                || !matches!(state, WorkflowState::Dispatching | WorkflowState::Stopping)
            {
                debug!(batch_id = %run_id, index, "Discarding stale dispatch result");
                return;
            }
            let stopping = state == WorkflowState::Stopping;
            let target_id = slot.current_target_id().unwrap_or_default();

            match result {
                Ok(report) if report.succeeded() => {
                    info!(target_id = %target_id, attempts = report.action.attempt, "Target dispatched");
                    slot.record(|outcome| outcome.completed += 1);
                    slot.advance(&self.inner.state, &mut tx);
                }
                Ok(report) => {
                    warn!(
                        target_id = %target_id,
                        attempts = report.action.attempt,
                        failure_class = ?report.failure_class,
                        "Dispatch failed, isolating target"
                    );
                    slot.record(|outcome| outcome.failed += 1);
                    slot.advance(&self.inner.state, &mut tx);
                }
                Err(QueueError::SessionExpired { .. }) if !stopping => {
                    slot.fail(FailureKind::SessionExpired, &self.inner.state, &mut tx);
                }
                Err(e) => {
                    let kind = match e {
                        QueueError::SessionExpired { .. } => FailureKind::SessionExpired,
                        QueueError::Blocked { .. } => FailureKind::Blocked,
                        QueueError::Aborted | QueueError::Closed => FailureKind::QueueUnavailable,
                    };
                    slot.record(|outcome| outcome.failed += 1);

                    if stopping {
                        if let Some(run) = slot.run.as_mut() {
                            run.last_failure = Some(BatchFailure { kind, target_id });
                        }
                        slot.settle(true, &self.inner.state, &mut tx);
                        if kind == FailureKind::SessionExpired {
                            self.release_paused_queue();
                        }
                    } else {
                        slot.fail(kind, &self.inner.state, &mut tx);
                    }
                }
            }
        }

        self.apply(tx);
    }
}

impl std::fmt::Debug for BatchWorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWorkflowController")
            .field("state", &self.current_state())
            .field("queue", &self.inner.queue)
            .finish()
    }
}

async fn generate_with_retry(
    generator: &dyn ContentGenerator,
    target: &Target,
    context: &GenerationContext,
    retries: u32,
) -> std::result::Result<GeneratedContent, GenerationError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match generator.generate(target, context).await {
            Ok(content) => return Ok(content),
            Err(e) if attempt <= retries => {
                warn!(target_id = %target.id, attempt, error = %e, "Content generation failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

fn validate_targets(targets: &[Target]) -> Result<()> {
    if targets.is_empty() {
        return Err(OrchestratorError::Validation(
            "at least one target is required".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(targets.len());
    for (position, target) in targets.iter().enumerate() {
        if target.id.trim().is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "target at position {position} has an empty id"
            )));
        }
        if !seen.insert(target.id.as_str()) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate target id {}",
                target.id
            )));
        }
    }
    Ok(())
}
