//! Checkpoint persistence.
//!
//! A checkpoint is the latest [`WorkflowContext`] of a workflow, written
//! after every transition so a crash or pause loses at most one in-flight
//! stage. Stores never lock per workflow themselves: the owning session
//! serializes access to one id, and unrelated ids proceed independently.

mod envelope;
mod file;
mod memory;

pub use envelope::Checkpoint;
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use crate::context::WorkflowContext;
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use uuid::Uuid;

/// Durable `workflow_id -> context` mapping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Persists `context`, overwriting any previous checkpoint.
    async fn save(&self, workflow_id: Uuid, context: &WorkflowContext) -> Result<()>;

    /// Returns the latest checkpoint.
    ///
    /// Fails with `NotFound` for unknown ids and `CheckpointIo` for
    /// unreadable or corrupt checkpoints.
    async fn load(&self, workflow_id: Uuid) -> Result<WorkflowContext>;

    /// Removes a checkpoint; removing a missing one succeeds.
    async fn delete(&self, workflow_id: Uuid) -> Result<()>;

    /// Ids of all stored checkpoints.
    async fn list(&self) -> Result<Vec<Uuid>>;
}
