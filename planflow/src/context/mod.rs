//! Workflow state.
//!
//! This module provides:
//! - The mutable per-workflow context owned by the execution engine
//! - The read-only view handed to stage processors
//! - Progress snapshots for external observers
//! - History and error records

mod records;
mod snapshot;
mod view;
mod workflow;

pub use records::{ErrorRecord, ErrorSeverity, HistoryEntry, TransitionOutcome};
pub use snapshot::ProgressSnapshot;
pub use view::ContextView;
pub use workflow::WorkflowContext;
