//! Observability utilities.
//!
//! Engine diagnostics are emitted through `tracing`; this module installs a
//! subscriber for binaries and tests and builds the spans the engine runs in.

mod spans;
mod subscriber;

pub use spans::{stage_span, workflow_span};
pub use subscriber::{init_tracing, LogFormat};
