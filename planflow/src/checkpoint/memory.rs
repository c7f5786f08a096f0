//! In-process checkpoint store.

use super::{Checkpoint, CheckpointStore};
use crate::context::WorkflowContext;
use crate::errors::{CheckpointIoError, NotFoundError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Keeps encoded checkpoints in a sharded map.
///
/// Entries are stored encoded so `load` exercises the same decode and
/// verification path as a durable store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<Uuid, String>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrites the raw stored bytes, for corruption tests.
    pub fn insert_raw(&self, workflow_id: Uuid, raw: impl Into<String>) {
        self.entries.insert(workflow_id, raw.into());
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, workflow_id: Uuid, context: &WorkflowContext) -> Result<()> {
        let raw = Checkpoint::seal(context)?.to_json()?;
        self.entries.insert(workflow_id, raw);
        Ok(())
    }

    async fn load(&self, workflow_id: Uuid) -> Result<WorkflowContext> {
        let raw = self
            .entries
            .get(&workflow_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NotFoundError::checkpoint(workflow_id))?;
        let checkpoint = Checkpoint::from_json(&raw)
            .map_err(|message| CheckpointIoError::new(workflow_id, "load", message))?;
        Ok(checkpoint.context)
    }

    async fn delete(&self, workflow_id: Uuid) -> Result<()> {
        self.entries.remove(&workflow_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }
}
