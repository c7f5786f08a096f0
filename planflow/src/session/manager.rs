//! The session manager: one engine per workflow, keyed by workflow id.

use super::{ControlAction, SessionHandle, SessionSummary};
use crate::checkpoint::CheckpointStore;
use crate::config::SessionConfig;
use crate::context::{ProgressSnapshot, WorkflowContext};
use crate::core::DataMap;
use crate::engine::{ExecutionEngine, RunOutcome, WorkflowDefinition};
use crate::errors::{NotFoundError, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::StageRegistry;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input key that overrides the configured email distribution default.
pub const EMAIL_DISTRIBUTION_INPUT: &str = "email_distribution";

/// Owns every in-flight workflow.
///
/// Sessions live in a sharded map; map guards are never held across an
/// await, so a slow workflow never blocks lookups of other sessions.
#[derive(Debug)]
pub struct SessionManager {
    definition: Arc<WorkflowDefinition>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionManager {
    /// Creates a manager whose engines run `registry` under `config.engine`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the registry and router disagree or
    /// the engine config is invalid.
    pub fn new(registry: StageRegistry, config: SessionConfig, store: Arc<dyn CheckpointStore>) -> Result<Self> {
        let definition = Arc::new(WorkflowDefinition::new(registry, config.engine.clone())?);
        Ok(Self::with_definition(definition, config, store))
    }

    /// Creates a manager around an existing definition.
    #[must_use]
    pub fn with_definition(
        definition: Arc<WorkflowDefinition>,
        config: SessionConfig,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            definition,
            store,
            sink: Arc::new(NoOpEventSink),
            config,
            sessions: DashMap::new(),
        }
    }

    /// Sets the sink every engine reports to.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of sessions held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is held in memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn engine_for(&self, context: WorkflowContext) -> ExecutionEngine {
        ExecutionEngine::new(context, Arc::clone(&self.definition), Arc::clone(&self.store))
            .with_sink(Arc::clone(&self.sink))
    }

    /// Starts a workflow for `inputs` and writes its first checkpoint.
    ///
    /// The workflow does not run until [`SessionManager::run`] or
    /// [`SessionManager::spawn`] is called.
    ///
    /// # Errors
    ///
    /// `CheckpointIo` if the initial checkpoint cannot be written.
    pub async fn create(&self, inputs: DataMap) -> Result<Uuid> {
        let email_distribution = inputs
            .get(EMAIL_DISTRIBUTION_INPUT)
            .and_then(Value::as_bool)
            .unwrap_or(self.definition.config().email_distribution);

        let mut engine = self.engine_for(WorkflowContext::new(inputs, email_distribution));
        engine.checkpoint().await?;

        let id = engine.workflow_id();
        self.sessions.insert(id, SessionHandle::new(engine));
        info!(workflow_id = %id, email_distribution, "Session created");
        Ok(id)
    }

    /// Looks up a session. Lookups do not count as activity; only driving,
    /// selections and control actions keep a session from expiring.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub fn get(&self, session_id: Uuid) -> Result<SessionHandle> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NotFoundError::session(session_id).into())
    }

    /// The latest status of a session, without waiting on its engine.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub fn status(&self, session_id: Uuid) -> Result<ProgressSnapshot> {
        Ok(self.get(session_id)?.status())
    }

    /// Drives a session until it halts.
    ///
    /// # Errors
    ///
    /// `NotFound`, or checkpoint failures from the engine.
    pub async fn run(&self, session_id: Uuid) -> Result<RunOutcome> {
        self.get(session_id)?.run().await
    }

    /// Drives a session in streaming mode until it halts.
    ///
    /// # Errors
    ///
    /// `NotFound`, or checkpoint failures from the engine.
    pub async fn run_streaming(&self, session_id: Uuid) -> Result<RunOutcome> {
        self.get(session_id)?.run_streaming().await
    }

    /// Drives a session on a background task.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub fn spawn(&self, session_id: Uuid) -> Result<JoinHandle<Result<RunOutcome>>> {
        Ok(self.get(session_id)?.spawn())
    }

    /// Records a selection for a suspended session.
    ///
    /// # Errors
    ///
    /// `NotFound`, `WorkflowNotWaiting`, `SelectionMismatch` or `CheckpointIo`.
    pub async fn submit_selection(&self, session_id: Uuid, selection_type: &str, value: Value) -> Result<()> {
        self.get(session_id)?.submit_selection(selection_type, value).await
    }

    /// Applies a control action.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidControl` or `CheckpointIo`.
    pub async fn control(&self, session_id: Uuid, action: ControlAction) -> Result<ProgressSnapshot> {
        self.get(session_id)?.control(action).await
    }

    /// The assembled plan document of a session.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub async fn final_plan(&self, session_id: Uuid) -> Result<Value> {
        Ok(self.get(session_id)?.final_plan().await)
    }

    /// Removes a session and its checkpoint. A running driver is cancelled
    /// first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `CheckpointIo` if the checkpoint cannot
    /// be removed.
    pub async fn delete(&self, session_id: Uuid) -> Result<()> {
        let (_, handle) = self
            .sessions
            .remove(&session_id)
            .ok_or_else(|| NotFoundError::session(session_id))?;
        handle.shut_down("session deleted").await;
        self.store.delete(session_id).await?;
        info!(workflow_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Summaries of every in-memory session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by_key(|summary| summary.created_at);
        summaries
    }

    /// Drops idle sessions whose last activity is at least `session_ttl` old.
    /// Their checkpoints are kept so [`SessionManager::restore`] can revive
    /// them. Returns the number of sessions dropped.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.config.session_ttl();
        let now = Utc::now();
        let before = self.sessions.len();

        self.sessions.retain(|id, handle| {
            let expired = (now - handle.last_activity())
                .to_std()
                .is_ok_and(|idle| idle >= ttl);
            if expired && !handle.is_busy() {
                debug!(workflow_id = %id, "Session expired");
                false
            } else {
                true
            }
        });

        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(purged, "Expired sessions purged");
        }
        purged
    }

    /// Rebuilds a session from its last checkpoint.
    ///
    /// Restoring a session that is already in memory returns its status
    /// unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` if no checkpoint exists, `CheckpointIo` if it is unreadable.
    pub async fn restore(&self, workflow_id: Uuid) -> Result<ProgressSnapshot> {
        if let Ok(handle) = self.get(workflow_id) {
            return Ok(handle.status());
        }

        let context = self.store.load(workflow_id).await?;
        let handle = SessionHandle::new(self.engine_for(context));
        let handle = self.sessions.entry(workflow_id).or_insert(handle).value().clone();

        let status = handle.status();
        info!(workflow_id = %workflow_id, stage = %status.current_stage, "Session restored");
        Ok(status)
    }

    /// Restores every stored checkpoint that is not already in memory, for
    /// recovery after a process restart. Unreadable checkpoints are logged
    /// and skipped. Returns the ids now held in memory, sorted.
    ///
    /// # Errors
    ///
    /// `CheckpointIo` if the store cannot enumerate its checkpoints.
    pub async fn restore_all(&self) -> Result<Vec<Uuid>> {
        let mut restored = Vec::new();
        for workflow_id in self.store.list().await? {
            match self.restore(workflow_id).await {
                Ok(_) => restored.push(workflow_id),
                Err(err) => warn!(workflow_id = %workflow_id, error = %err, "Checkpoint skipped"),
            }
        }
        info!(count = restored.len(), "Sessions recovered");
        Ok(restored)
    }
}
