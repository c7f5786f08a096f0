//! A cloneable handle to one session's engine.

use super::{ControlAction, SessionSummary};
use crate::context::{ProgressSnapshot, WorkflowContext};
use crate::engine::{ControlToken, ExecutionEngine, RunOutcome};
use crate::errors::{PlanflowError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

const CANCEL_REASON: &str = "cancelled by user";

#[derive(Debug)]
struct Session {
    workflow_id: Uuid,
    engine: tokio::sync::Mutex<ExecutionEngine>,
    control: Arc<ControlToken>,
    status: Arc<RwLock<ProgressSnapshot>>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
}

/// Access to one session.
///
/// The engine sits behind an async mutex: one driver at a time, while
/// status reads go through the lock-free published snapshot.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    pub(super) fn new(engine: ExecutionEngine) -> Self {
        let control = Arc::new(ControlToken::new());
        let engine = engine.with_control(Arc::clone(&control));
        let now = Utc::now();
        Self {
            session: Arc::new(Session {
                workflow_id: engine.workflow_id(),
                status: engine.status_handle(),
                engine: tokio::sync::Mutex::new(engine),
                control,
                created_at: now,
                last_activity: Mutex::new(now),
            }),
        }
    }

    /// The session (and workflow) id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.session.workflow_id
    }

    /// The latest committed state, readable while the engine runs.
    #[must_use]
    pub fn status(&self) -> ProgressSnapshot {
        let mut snapshot = self.session.status.read().clone();
        snapshot.paused = self.session.control.is_paused();
        snapshot
    }

    /// A summary row for listings.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let status = self.status();
        SessionSummary {
            session_id: self.id(),
            current_stage: status.current_stage,
            progress: status.progress,
            waiting_for_input: status.waiting_for_input,
            paused: status.paused,
            created_at: self.session.created_at,
            last_activity: self.last_activity(),
        }
    }

    /// When the session was created or restored.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.session.created_at
    }

    /// Last time the session was used.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.session.last_activity.lock()
    }

    /// Returns true while an engine driver holds the session.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.session.engine.try_lock().is_err()
    }

    pub(super) fn touch(&self) {
        *self.session.last_activity.lock() = Utc::now();
    }

    /// Drives the workflow until it halts.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint failures from the engine.
    pub async fn run(&self) -> Result<RunOutcome> {
        self.touch();
        let outcome = self.session.engine.lock().await.run().await;
        self.touch();
        self.settle(outcome?).await
    }

    /// Drives the workflow in streaming mode until it halts.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint failures from the engine.
    pub async fn run_streaming(&self) -> Result<RunOutcome> {
        self.touch();
        let outcome = self.session.engine.lock().await.run_streaming().await;
        self.touch();
        self.settle(outcome?).await
    }

    /// Drives the workflow on a background task.
    #[must_use]
    pub fn spawn(&self) -> JoinHandle<Result<RunOutcome>> {
        let handle = self.clone();
        tokio::spawn(async move { handle.run_streaming().await })
    }

    /// Records a selection for the suspended stage.
    ///
    /// # Errors
    ///
    /// `WorkflowNotWaiting`, `SelectionMismatch` or `CheckpointIo`.
    pub async fn submit_selection(&self, selection_type: &str, value: Value) -> Result<()> {
        self.touch();
        let submitted = self
            .session
            .engine
            .lock()
            .await
            .submit_selection(selection_type, value)
            .await;
        self.apply_pending_cancel().await?;
        submitted
    }

    /// Applies a control action and returns the resulting status.
    ///
    /// Pause and cancel requests made while a driver holds the engine take
    /// effect at its next stage boundary.
    ///
    /// # Errors
    ///
    /// `InvalidControl` for actions that make no sense in the current state,
    /// `CheckpointIo` when the change cannot be persisted.
    pub async fn control(&self, action: ControlAction) -> Result<ProgressSnapshot> {
        self.touch();
        let stage = self.status().current_stage;
        let control = &self.session.control;

        match action {
            ControlAction::Pause => {
                ensure_active(action, stage)?;
                control.pause();
            }
            ControlAction::Resume => {
                ensure_active(action, stage)?;
                if !control.resume() {
                    return Err(PlanflowError::invalid_control(action.as_str(), stage, "workflow is not paused"));
                }
            }
            ControlAction::Cancel => {
                ensure_active(action, stage)?;
                control.cancel(CANCEL_REASON);
                if let Ok(mut engine) = self.session.engine.try_lock() {
                    if !engine.context().current_stage().is_terminal() {
                        engine.cancel_now(CANCEL_REASON).await?;
                    }
                }
            }
            ControlAction::Restart => {
                // Stop a running driver at its next boundary before resetting.
                let was_paused = !control.pause();
                let mut engine = self.session.engine.lock().await;
                if let Err(err) = engine.restart().await {
                    if !was_paused {
                        control.resume();
                    }
                    return Err(err);
                }
            }
        }

        info!(workflow_id = %self.id(), action = %action, "Control action applied");
        Ok(self.status())
    }

    /// A copy of the full context.
    pub async fn context(&self) -> WorkflowContext {
        let context = self.session.engine.lock().await.context().clone();
        self.settle_after_read().await;
        context
    }

    /// The assembled plan document.
    pub async fn final_plan(&self) -> Value {
        let plan = self.session.engine.lock().await.context().final_plan();
        self.settle_after_read().await;
        plan
    }

    async fn settle_after_read(&self) {
        if let Err(err) = self.apply_pending_cancel().await {
            warn!(workflow_id = %self.id(), error = %err, "Pending cancel could not be persisted");
        }
    }

    /// Replaces a non-terminal `outcome` with `Cancelled` when a cancel
    /// request was left pending by the driver that just returned.
    async fn settle(&self, outcome: RunOutcome) -> Result<RunOutcome> {
        if !outcome.is_terminal() && self.apply_pending_cancel().await? {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(outcome)
    }

    /// Applies a cancel request that no stage boundary has observed yet.
    ///
    /// Runs after the engine lock is released: a cancel whose `try_lock`
    /// failed was issued while a holder had the engine, so that holder sees
    /// the flag here. Returns true if this call moved the workflow to
    /// `CANCELLED`.
    async fn apply_pending_cancel(&self) -> Result<bool> {
        if !self.session.control.is_cancelled() {
            return Ok(false);
        }
        let mut engine = self.session.engine.lock().await;
        if engine.context().current_stage().is_terminal() {
            return Ok(false);
        }
        let reason = self
            .session
            .control
            .reason()
            .unwrap_or_else(|| CANCEL_REASON.to_string());
        engine.cancel_now(reason).await?;
        Ok(true)
    }

    /// Requests cancellation, waits for any driver to release the engine and
    /// leaves the workflow terminal. No checkpoint is written after this
    /// returns.
    pub(super) async fn shut_down(&self, reason: &str) {
        self.session.control.cancel(reason);
        let mut engine = self.session.engine.lock().await;
        if !engine.context().current_stage().is_terminal() {
            if let Err(err) = engine.cancel_now(reason).await {
                warn!(workflow_id = %self.id(), error = %err, "Cancel before removal was not persisted");
            }
        }
    }
}

fn ensure_active(action: ControlAction, stage: crate::core::Stage) -> Result<()> {
    if stage.is_terminal() {
        Err(PlanflowError::invalid_control(action.as_str(), stage, "workflow already finished"))
    } else {
        Ok(())
    }
}
