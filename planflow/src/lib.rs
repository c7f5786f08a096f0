//! # Planflow
//!
//! A checkpointed, pausable orchestration engine that drives an event-plan
//! request through a fixed set of generation stages.
//!
//! Planflow provides:
//!
//! - **Declarative routing**: every stage's successor is chosen by a pure
//!   decision function over the workflow context
//! - **Bounded revision loops**: review feedback can send the workflow back,
//!   at most `max_revisions` times per stage
//! - **Human-in-the-loop suspension**: selection stages wait for an external
//!   choice and resume from a checkpoint
//! - **Durable progress**: the context is persisted after every transition
//! - **Session control**: pause, resume, cancel and restart per workflow
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use planflow::prelude::*;
//!
//! let manager = SessionManager::new(registry, SessionConfig::default(), store)?;
//! let id = manager.create(inputs).await?;
//!
//! match manager.run(id).await? {
//!     RunOutcome::Suspended(kind) => {
//!         manager.submit_selection(id, kind.as_str(), choice).await?;
//!         manager.run(id).await?;
//!     }
//!     outcome => println!("{outcome:?}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod routing;
pub mod session;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
    pub use crate::config::{EngineConfig, SessionConfig};
    pub use crate::context::{ContextView, ProgressSnapshot, WorkflowContext};
    pub use crate::core::{
        DataMap, OutputStatus, RevisionRequest, SelectionType, Stage, StageIssue, StageOutput,
        TransitionEvent,
    };
    pub use crate::engine::{ExecutionEngine, RetryPolicy, RunOutcome, StepOutcome, WorkflowDefinition};
    pub use crate::errors::{PlanflowError, Result};
    pub use crate::events::{ChannelEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::routing::{RouteDecision, RouterTable};
    pub use crate::session::{ControlAction, SessionHandle, SessionManager, SessionSummary};
    pub use crate::stages::{FnProcessor, StageProcessor, StageRegistration, StageRegistry};
}
