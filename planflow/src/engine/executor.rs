//! The execution engine that drives one workflow through its stages.
//!
//! Each [`ExecutionEngine::step`] runs the current stage's processor (with
//! timeout and retries), merges its output into a candidate context, asks
//! the router for the next stage, checkpoints the candidate and only then
//! commits it. A failed checkpoint therefore never advances the workflow.

use super::{ControlToken, WorkflowDefinition};
use crate::checkpoint::CheckpointStore;
use crate::context::{ErrorSeverity, HistoryEntry, ProgressSnapshot, TransitionOutcome, WorkflowContext};
use crate::core::{event_types, OutputStatus, SelectionType, Stage, StageOutput, TransitionEvent};
use crate::errors::{
    CheckpointIoError, PlanflowError, Result, SelectionMismatchError, StageExecutionError,
    WorkflowNotWaitingError,
};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{stage_span, workflow_span};
use crate::routing::{RouteDecision, RouterTable};
use crate::stages::StageProcessor;
use futures::Stream;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// How a run (or a single step) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached `COMPLETED`.
    Completed,
    /// Reached `ERROR`.
    Failed,
    /// Reached `CANCELLED`.
    Cancelled,
    /// Waiting for a selection of the given kind.
    Suspended(SelectionType),
    /// Stopped at a boundary because of a pause request.
    Paused,
}

impl RunOutcome {
    /// Returns true for outcomes that end the workflow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn for_terminal(stage: Stage) -> Option<Self> {
        match stage {
            Stage::Completed => Some(Self::Completed),
            Stage::Error => Some(Self::Failed),
            Stage::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// The result of one engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The workflow moved from one stage to another.
    Advanced {
        /// The stage that ran.
        from: Stage,
        /// The stage that runs next.
        to: Stage,
    },
    /// The workflow cannot proceed without outside action.
    Halted(RunOutcome),
}

/// Drives a single workflow.
///
/// The engine exclusively owns its [`WorkflowContext`]; processors receive
/// a [`ContextView`](crate::context::ContextView) and observers read the
/// published [`ProgressSnapshot`].
#[derive(Debug)]
pub struct ExecutionEngine {
    context: WorkflowContext,
    definition: Arc<WorkflowDefinition>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    control: Arc<ControlToken>,
    status: Arc<RwLock<ProgressSnapshot>>,
}

impl ExecutionEngine {
    /// Creates an engine over an existing context.
    #[must_use]
    pub fn new(
        context: WorkflowContext,
        definition: Arc<WorkflowDefinition>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let status = Arc::new(RwLock::new(context.snapshot(false)));
        Self {
            context,
            definition,
            store,
            sink: Arc::new(NoOpEventSink),
            control: Arc::new(ControlToken::new()),
            status,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares a control token with the caller.
    #[must_use]
    pub fn with_control(mut self, control: Arc<ControlToken>) -> Self {
        self.control = control;
        self.publish();
        self
    }

    /// The current context.
    #[must_use]
    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    /// The workflow id.
    #[must_use]
    pub fn workflow_id(&self) -> Uuid {
        self.context.workflow_id()
    }

    /// The definition this engine runs.
    #[must_use]
    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    /// The control token observed at stage boundaries.
    #[must_use]
    pub fn control(&self) -> &Arc<ControlToken> {
        &self.control
    }

    /// The shared slot the engine publishes snapshots into.
    #[must_use]
    pub fn status_handle(&self) -> Arc<RwLock<ProgressSnapshot>> {
        Arc::clone(&self.status)
    }

    /// A fresh snapshot of the committed state.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.context.snapshot(self.control.is_paused())
    }

    /// Runs stages until the workflow completes, fails, is cancelled,
    /// suspends for input or is paused.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointIo` when a checkpoint cannot be written; the
    /// context stays at the last committed stage.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        loop {
            if let StepOutcome::Halted(outcome) = self.step().await? {
                return Ok(outcome);
            }
        }
    }

    /// Like [`ExecutionEngine::run`], but yields to the runtime after every
    /// stage so observers can keep up with the event stream.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionEngine::run`].
    pub async fn run_streaming(&mut self) -> Result<RunOutcome> {
        use futures::StreamExt;

        let mut last = None;
        {
            let steps = self.stream();
            futures::pin_mut!(steps);
            while let Some(step) = steps.next().await {
                last = Some(step?);
            }
        }
        match last {
            Some(StepOutcome::Halted(outcome)) => Ok(outcome),
            _ => Err(PlanflowError::validation("step stream ended without halting")),
        }
    }

    /// Yields every step until the workflow halts. The stream ends after the
    /// first `Halted` outcome or error.
    pub fn stream(&mut self) -> impl Stream<Item = Result<StepOutcome>> + Send + '_ {
        futures::stream::unfold((self, false), |(engine, done)| async move {
            if done {
                return None;
            }
            let step = engine.step().await;
            let finished = !matches!(step, Ok(StepOutcome::Advanced { .. }));
            if !finished {
                tokio::task::yield_now().await;
            }
            Some((step, (engine, finished)))
        })
    }

    /// Executes the current stage and applies the routing decision.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointIo` when the resulting state cannot be persisted.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let span = workflow_span(self.context.workflow_id(), self.context.current_stage());
        self.step_inner().instrument(span).await
    }

    async fn step_inner(&mut self) -> Result<StepOutcome> {
        let stage = self.context.current_stage();

        if let Some(outcome) = RunOutcome::for_terminal(stage) {
            return Ok(StepOutcome::Halted(outcome));
        }
        if self.control.is_cancelled() {
            return self.apply_cancel().await;
        }
        if self.control.is_paused() {
            self.publish();
            self.emit(self.event(event_types::PAUSED)).await;
            if self.control.is_cancelled() {
                return self.apply_cancel().await;
            }
            info!("Workflow paused");
            return Ok(StepOutcome::Halted(RunOutcome::Paused));
        }
        if let Some(kind) = self.context.expected_selection() {
            return Ok(StepOutcome::Halted(RunOutcome::Suspended(kind)));
        }

        let definition = Arc::clone(&self.definition);
        let Some(registration) = definition.registry().get(stage) else {
            let err = StageExecutionError::new(stage, "no processor registered");
            return self.fail(self.context.clone(), &err.to_string(), 1, 0).await;
        };
        let processor = Arc::clone(registration.processor());
        let stage_retryable = registration.retryable();
        let policy = &definition.config().retry;

        let mut retries = 0u32;
        loop {
            let attempt = retries + 1;
            self.emit(self.event(event_types::STAGE_STARTED).add_data("attempt", json!(attempt)))
                .await;
            debug!(attempt, processor = processor.name(), "Running stage processor");

            let started = Instant::now();
            let result = self
                .invoke(Arc::clone(&processor), stage)
                .instrument(stage_span(stage, processor.name(), attempt))
                .await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if self.control.is_cancelled() {
                debug!("Discarding processor output after cancellation");
                return self.apply_cancel().await;
            }

            let failure = match result {
                Ok(output) => match output.status {
                    OutputStatus::Ok => return self.complete(stage, &output, attempt, duration_ms).await,
                    OutputStatus::NeedsInput => {
                        if let Some(kind) = stage.selection_type() {
                            return self.suspend(self.context.clone(), kind).await;
                        }
                        StageExecutionError::new(stage, "requested input at a stage without a selection")
                    }
                    OutputStatus::Fail => StageExecutionError::new(
                        stage,
                        output.error.unwrap_or_else(|| "processor reported failure".to_string()),
                    )
                    .with_retryable(output.retryable),
                },
                Err(err) => err,
            };

            if failure.retryable && stage_retryable && policy.allows(retries) {
                let delay = policy.delay_for(retries);
                warn!(
                    attempt,
                    error = %failure,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Stage failed, retrying"
                );
                self.context.record_error(stage, failure.message.clone(), ErrorSeverity::Recoverable);
                self.publish();
                self.emit(
                    self.event(event_types::RETRYING)
                        .add_data("attempt", json!(attempt))
                        .add_data("error", json!(failure.message)),
                )
                .await;
                tokio::time::sleep(delay).await;
                if self.control.is_cancelled() {
                    return self.apply_cancel().await;
                }
                retries += 1;
                continue;
            }

            return self
                .fail(self.context.clone(), &failure.to_string(), attempt, duration_ms)
                .await;
        }
    }

    async fn invoke(
        &self,
        processor: Arc<dyn StageProcessor>,
        stage: Stage,
    ) -> std::result::Result<StageOutput, StageExecutionError> {
        let view = self.context.view();
        let limit = self.definition.config().stage_timeout();
        let mut handle = tokio::spawn(async move { processor.process(&view).await });

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(join_err)) => Err(StageExecutionError::new(
                stage,
                format!("processor aborted: {join_err}"),
            )),
            Err(_) => {
                handle.abort();
                Err(StageExecutionError::timeout(stage, limit))
            }
        }
    }

    async fn complete(
        &mut self,
        stage: Stage,
        output: &StageOutput,
        attempt: u32,
        duration_ms: u64,
    ) -> Result<StepOutcome> {
        let definition = Arc::clone(&self.definition);
        let mut candidate = self.context.clone();
        candidate.merge_output(stage, output, definition.config().min_valid_results);

        let next = match definition.router().decide(&candidate) {
            RouteDecision::Continue(next) => next,
            RouteDecision::Suspend => {
                return match stage.selection_type() {
                    Some(kind) => self.suspend(candidate, kind).await,
                    None => {
                        let reason = format!("cannot suspend at {stage}");
                        self.fail(candidate, &reason, attempt, duration_ms).await
                    }
                };
            }
            RouteDecision::Fail(failure) => {
                return self.fail(candidate, &failure.to_string(), attempt, duration_ms).await;
            }
        };

        candidate.push_history(
            HistoryEntry::new(stage, TransitionOutcome::Completed)
                .with_next_stage(next)
                .with_timing(attempt, duration_ms),
        );

        if stage == Stage::HandleRevisions && next != Stage::ReviewPhase {
            candidate.take_revision_request();
        }
        if stage == Stage::ReviewPhase && next != Stage::HandleRevisions {
            candidate.clear_revision_requests();
        }

        let backward = RouterTable::is_backward(stage, next);
        let mut revision = None;
        if backward {
            revision = Some(candidate.increment_revision(next));
            candidate.rollback_to(stage, next);
        }
        candidate.set_stage(next);

        self.commit(candidate).await?;

        info!(from = %stage, to = %next, attempt, duration_ms, "Stage transition");
        self.emit(
            TransitionEvent::new(event_types::STAGE_COMPLETED, self.workflow_id(), stage, self.context.progress())
                .with_next_stage(next)
                .add_data("attempt", json!(attempt))
                .add_data("duration_ms", json!(duration_ms)),
        )
        .await;
        if let Some(count) = revision {
            self.emit(
                TransitionEvent::new(event_types::ROLLED_BACK, self.workflow_id(), stage, self.context.progress())
                    .with_next_stage(next)
                    .add_data("revision_count", json!(count)),
            )
            .await;
        }
        self.emit(
            TransitionEvent::new(event_types::TRANSITION, self.workflow_id(), stage, self.context.progress())
                .with_next_stage(next),
        )
        .await;
        if next == Stage::Completed {
            info!("Workflow completed");
            self.emit(self.event(event_types::COMPLETED)).await;
        }

        Ok(StepOutcome::Advanced { from: stage, to: next })
    }

    async fn suspend(&mut self, mut candidate: WorkflowContext, kind: SelectionType) -> Result<StepOutcome> {
        candidate.set_waiting(true);
        self.commit(candidate).await?;

        info!(selection_type = %kind, "Workflow waiting for input");
        self.emit(self.event(event_types::SUSPENDED).add_data("selection_type", json!(kind.as_str())))
            .await;
        // Cancels that arrive while the suspension is published apply here.
        if self.control.is_cancelled() {
            return self.apply_cancel().await;
        }
        Ok(StepOutcome::Halted(RunOutcome::Suspended(kind)))
    }

    async fn fail(
        &mut self,
        mut candidate: WorkflowContext,
        message: &str,
        attempt: u32,
        duration_ms: u64,
    ) -> Result<StepOutcome> {
        let stage = candidate.current_stage();
        candidate.record_error(stage, message, ErrorSeverity::Fatal);
        candidate.push_history(
            HistoryEntry::new(stage, TransitionOutcome::Failed)
                .with_next_stage(Stage::Error)
                .with_timing(attempt, duration_ms)
                .add_data("error", json!(message)),
        );
        candidate.set_waiting(false);
        candidate.set_stage(Stage::Error);
        self.commit(candidate).await?;

        error!(stage = %stage, error = message, "Workflow failed");
        self.emit(
            TransitionEvent::new(event_types::FAILED, self.workflow_id(), stage, self.context.progress())
                .with_next_stage(Stage::Error)
                .add_data("error", json!(message)),
        )
        .await;
        Ok(StepOutcome::Halted(RunOutcome::Failed))
    }

    async fn apply_cancel(&mut self) -> Result<StepOutcome> {
        let stage = self.context.current_stage();
        let reason = self.control.reason().unwrap_or_else(|| "cancelled".to_string());

        let mut candidate = self.context.clone();
        candidate.push_history(
            HistoryEntry::new(stage, TransitionOutcome::Cancelled)
                .with_next_stage(Stage::Cancelled)
                .add_data("reason", json!(reason)),
        );
        candidate.set_waiting(false);
        candidate.set_stage(Stage::Cancelled);
        self.commit(candidate).await?;

        info!(stage = %stage, reason = %reason, "Workflow cancelled");
        self.emit(
            TransitionEvent::new(event_types::CANCELLED, self.workflow_id(), stage, self.context.progress())
                .with_next_stage(Stage::Cancelled)
                .add_data("reason", json!(reason)),
        )
        .await;
        Ok(StepOutcome::Halted(RunOutcome::Cancelled))
    }

    /// Records an externally supplied choice and clears the suspension.
    ///
    /// On error the context is left untouched.
    ///
    /// # Errors
    ///
    /// `WorkflowNotWaiting` if the workflow is not suspended,
    /// `SelectionMismatch` if `selection_type` is not the expected kind and
    /// `CheckpointIo` if the result cannot be persisted.
    pub async fn submit_selection(&mut self, selection_type: &str, value: Value) -> Result<()> {
        let workflow_id = self.workflow_id();
        let Some(expected) = self.context.expected_selection() else {
            return Err(WorkflowNotWaitingError {
                workflow_id,
                stage: self.context.current_stage(),
            }
            .into());
        };
        if selection_type.parse::<SelectionType>().ok() != Some(expected) {
            return Err(SelectionMismatchError {
                workflow_id,
                expected,
                received: selection_type.to_string(),
            }
            .into());
        }

        let mut candidate = self.context.clone();
        candidate.insert_selection(expected, value);
        candidate.set_waiting(false);
        self.commit(candidate).await?;

        info!(workflow_id = %workflow_id, selection_type = %expected, "Selection recorded");
        Ok(())
    }

    /// Cancels immediately. Only valid while no step is in flight, which
    /// `&mut self` guarantees.
    ///
    /// # Errors
    ///
    /// `InvalidControl` for a workflow that already finished, `CheckpointIo`
    /// if the cancellation cannot be persisted.
    pub async fn cancel_now(&mut self, reason: impl Into<String>) -> Result<RunOutcome> {
        let stage = self.context.current_stage();
        if stage.is_terminal() {
            return Err(PlanflowError::invalid_control("cancel", stage, "workflow already finished"));
        }
        self.control.cancel(reason);
        match self.apply_cancel().await? {
            StepOutcome::Halted(outcome) => Ok(outcome),
            StepOutcome::Advanced { .. } => Ok(RunOutcome::Cancelled),
        }
    }

    /// Rebuilds the context from its original inputs under the same id and
    /// clears pending control requests. A failed restart leaves both the
    /// context and the control requests untouched.
    ///
    /// # Errors
    ///
    /// `CheckpointIo` if the fresh context cannot be persisted.
    pub async fn restart(&mut self) -> Result<()> {
        let mut candidate = self.context.clone();
        candidate.reset();
        self.commit(candidate).await?;
        self.control.reset();
        info!(workflow_id = %self.workflow_id(), "Workflow restarted");
        Ok(())
    }

    /// Writes the initial checkpoint for a fresh context.
    ///
    /// # Errors
    ///
    /// `CheckpointIo` if the store rejects the write.
    pub async fn checkpoint(&mut self) -> Result<()> {
        let candidate = self.context.clone();
        self.commit(candidate).await
    }

    /// Persists `candidate` and makes it the committed context.
    async fn commit(&mut self, candidate: WorkflowContext) -> Result<()> {
        let workflow_id = candidate.workflow_id();
        match self.store.save(workflow_id, &candidate).await {
            Ok(()) => {
                self.context = candidate;
                self.publish();
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    PlanflowError::CheckpointIo(io) => io,
                    other => CheckpointIoError::new(workflow_id, "save", other.to_string()),
                };
                error!(workflow_id = %workflow_id, error = %err, "Checkpoint write failed");
                let stage = self.context.current_stage();
                self.context
                    .record_error(stage, err.to_string(), ErrorSeverity::Recoverable);
                self.publish();
                Err(err.into())
            }
        }
    }

    fn publish(&self) {
        *self.status.write() = self.context.snapshot(self.control.is_paused());
    }

    fn event(&self, event_type: &str) -> TransitionEvent {
        TransitionEvent::new(
            event_type,
            self.context.workflow_id(),
            self.context.current_stage(),
            self.context.progress(),
        )
    }

    async fn emit(&self, event: TransitionEvent) {
        self.sink.emit(&event).await;
    }
}
