//! Tagged decision results consumed by the engine.

use crate::core::Stage;
use crate::errors::RevisionLimitExceeded;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a stage's decision function concluded.
///
/// A branch is the key into the transition table, together with the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Move to the next stage in the pipeline.
    Advance,
    /// Run the same stage again.
    Repeat,
    /// Suspend until a selection arrives.
    AwaitInput,
    /// Go through revision handling.
    Revise,
    /// Restart content generation from the first stage.
    MajorChanges,
    /// Skip an optional stage.
    Skip,
}

impl Branch {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Repeat => "repeat",
            Self::AwaitInput => "await_input",
            Self::Revise => "revise",
            Self::MajorChanges => "major_changes",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why routing cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteFailure {
    /// A processor reported a fatal issue.
    #[error("stage {stage} reported a fatal issue")]
    StageFault {
        /// The faulty stage.
        stage: Stage,
    },

    /// A backward edge would exceed the revision bound.
    #[error("{0}")]
    RevisionLimit(RevisionLimitExceeded),

    /// The context does not support any outgoing edge.
    #[error("cannot route from {stage}: {reason}")]
    Unroutable {
        /// Where routing was attempted.
        stage: Stage,
        /// What was missing or malformed.
        reason: String,
    },
}

impl RouteFailure {
    /// Creates an unroutable failure.
    #[must_use]
    pub fn unroutable(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Unroutable {
            stage,
            reason: reason.into(),
        }
    }
}

/// The router's verdict for the current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Transition to the given stage.
    Continue(Stage),
    /// Stay put and wait for external input.
    Suspend,
    /// Route to `ERROR`.
    Fail(RouteFailure),
}

impl RouteDecision {
    /// The destination for `Continue`.
    #[must_use]
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Continue(stage) => Some(*stage),
            Self::Suspend | Self::Fail(_) => None,
        }
    }
}
