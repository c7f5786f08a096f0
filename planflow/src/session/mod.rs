//! Session management.
//!
//! A session owns one [`ExecutionEngine`](crate::engine::ExecutionEngine)
//! and therefore one workflow context; the session id is the workflow id.
//! The [`SessionManager`] keeps sessions in a sharded map so unrelated
//! workflows never contend on a shared lock.

mod handle;
mod manager;


pub use handle::SessionHandle;
pub use manager::SessionManager;

use crate::core::Stage;
use crate::errors::PlanflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An external control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Stop at the next stage boundary.
    Pause,
    /// Clear a pause so the workflow can be re-driven.
    Resume,
    /// Move to `CANCELLED`.
    Cancel,
    /// Rebuild the context from the original inputs.
    Restart,
}

impl ControlAction {
    /// Every action.
    pub const ALL: [Self; 4] = [Self::Pause, Self::Resume, Self::Cancel, Self::Restart];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = PlanflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| PlanflowError::validation(format!("unknown control action '{s}'")))
    }
}

/// One row of [`SessionManager::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// The session (and workflow) id.
    pub session_id: Uuid,
    /// Where the workflow is.
    pub current_stage: Stage,
    /// Progress percentage.
    pub progress: u8,
    /// True while suspended pending a selection.
    pub waiting_for_input: bool,
    /// True while a pause request is in effect.
    pub paused: bool,
    /// When the session was created or restored.
    pub created_at: DateTime<Utc>,
    /// Last time the session was used.
    pub last_activity: DateTime<Utc>,
}
