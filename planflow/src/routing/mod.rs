//! Conditional routing between stages.
//!
//! Routing is a pure function of the context: a per-stage decision function
//! yields a [`Branch`], and the [`RouterTable`] maps `(stage, branch)` to the
//! next stage. The engine consumes the result as a [`RouteDecision`].

mod decision;
pub mod rules;
mod table;

pub use decision::{Branch, RouteDecision, RouteFailure};
pub use rules::DecisionFn;
pub use table::{RouterTable, RoutingConfig};
