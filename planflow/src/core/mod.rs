//! Core domain model types for planflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - The stage enum with its progress table and selection types
//! - Stage processor output with factory methods
//! - Transition events

mod event;
mod output;
mod stage;

pub use event::{event_types, TransitionEvent};
pub use output::{DataMap, OutputStatus, RevisionRequest, StageIssue, StageOutput};
pub use stage::{SelectionType, Stage};
