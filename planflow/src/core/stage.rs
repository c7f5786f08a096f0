//! Workflow stages, selection types and the fixed stage -> progress table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A discrete step of the event-plan pipeline.
///
/// Variants are declared in pipeline order; the derived `Ord` is that order
/// and is what the router uses to tell forward edges from backward ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Initial state; validates the request.
    Initialized,
    /// Generates candidate event ideas.
    IdeaGeneration,
    /// Waits for the user to pick an idea.
    IdeaSelection,
    /// Researches candidate venues.
    LocationResearch,
    /// Waits for the user to pick a venue.
    LocationSelection,
    /// Researches vendor packages.
    VendorResearch,
    /// Waits for the user to pick a vendor package.
    VendorSelection,
    /// Builds the event schedule.
    SchedulePlanning,
    /// Waits for the user to approve the schedule.
    ScheduleApproval,
    /// Writes the invitation copy.
    InvitationCreation,
    /// Quality gate over the assembled plan.
    ReviewPhase,
    /// Dispatches pending revision requests.
    HandleRevisions,
    /// Renders export artifacts.
    ExportPreparation,
    /// Sends the plan to recipients.
    EmailDistribution,
    /// Terminal: the plan is done.
    Completed,
    /// Terminal: the workflow failed.
    Error,
    /// Terminal: the workflow was cancelled.
    Cancelled,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Self; 17] = [
        Self::Initialized,
        Self::IdeaGeneration,
        Self::IdeaSelection,
        Self::LocationResearch,
        Self::LocationSelection,
        Self::VendorResearch,
        Self::VendorSelection,
        Self::SchedulePlanning,
        Self::ScheduleApproval,
        Self::InvitationCreation,
        Self::ReviewPhase,
        Self::HandleRevisions,
        Self::ExportPreparation,
        Self::EmailDistribution,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::IdeaGeneration => "IDEA_GENERATION",
            Self::IdeaSelection => "IDEA_SELECTION",
            Self::LocationResearch => "LOCATION_RESEARCH",
            Self::LocationSelection => "LOCATION_SELECTION",
            Self::VendorResearch => "VENDOR_RESEARCH",
            Self::VendorSelection => "VENDOR_SELECTION",
            Self::SchedulePlanning => "SCHEDULE_PLANNING",
            Self::ScheduleApproval => "SCHEDULE_APPROVAL",
            Self::InvitationCreation => "INVITATION_CREATION",
            Self::ReviewPhase => "REVIEW_PHASE",
            Self::HandleRevisions => "HANDLE_REVISIONS",
            Self::ExportPreparation => "EXPORT_PREPARATION",
            Self::EmailDistribution => "EMAIL_DISTRIBUTION",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns true for `COMPLETED`, `ERROR` and `CANCELLED`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Progress percentage for this stage.
    ///
    /// `ERROR` and `CANCELLED` have no entry: a workflow keeps the progress
    /// it had reached when it halted.
    #[must_use]
    pub const fn progress(&self) -> Option<u8> {
        match self {
            Self::Initialized => Some(0),
            Self::IdeaGeneration => Some(10),
            Self::IdeaSelection => Some(15),
            Self::LocationResearch => Some(25),
            Self::LocationSelection => Some(30),
            Self::VendorResearch => Some(40),
            Self::VendorSelection => Some(45),
            Self::SchedulePlanning => Some(55),
            Self::ScheduleApproval => Some(60),
            Self::InvitationCreation => Some(70),
            Self::ReviewPhase | Self::HandleRevisions => Some(80),
            Self::ExportPreparation => Some(90),
            Self::EmailDistribution => Some(95),
            Self::Completed => Some(100),
            Self::Error | Self::Cancelled => None,
        }
    }

    /// The selection a suspended workflow waits for at this stage.
    #[must_use]
    pub const fn selection_type(&self) -> Option<SelectionType> {
        match self {
            Self::IdeaSelection => Some(SelectionType::Idea),
            Self::LocationSelection => Some(SelectionType::Location),
            Self::VendorSelection => Some(SelectionType::Vendor),
            Self::ScheduleApproval => Some(SelectionType::Schedule),
            _ => None,
        }
    }

    /// Returns true for stages that may loop on themselves when their
    /// results are insufficient.
    #[must_use]
    pub const fn is_research(&self) -> bool {
        matches!(
            self,
            Self::IdeaGeneration | Self::LocationResearch | Self::VendorResearch
        )
    }

    /// The content-producing stage a revision of `self` re-runs.
    ///
    /// Selection stages map to the generation stage that produced their
    /// options; content stages map to themselves; everything else has no
    /// generation step and cannot be revised.
    #[must_use]
    pub const fn generation_step(&self) -> Option<Self> {
        match self {
            Self::IdeaGeneration | Self::IdeaSelection => Some(Self::IdeaGeneration),
            Self::LocationResearch | Self::LocationSelection => Some(Self::LocationResearch),
            Self::VendorResearch | Self::VendorSelection => Some(Self::VendorResearch),
            Self::SchedulePlanning | Self::ScheduleApproval => Some(Self::SchedulePlanning),
            Self::InvitationCreation => Some(Self::InvitationCreation),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// The kind of choice an external actor supplies while a workflow is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    /// The chosen event idea.
    Idea,
    /// The chosen venue.
    Location,
    /// The chosen vendor package.
    Vendor,
    /// Approval of the generated schedule.
    Schedule,
}

impl SelectionType {
    /// Every selection type.
    pub const ALL: [Self; 4] = [Self::Idea, Self::Location, Self::Vendor, Self::Schedule];

    /// Returns the lower-case name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Location => "location",
            Self::Vendor => "vendor",
            Self::Schedule => "schedule",
        }
    }

    /// The stage that suspends waiting for this selection.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Idea => Stage::IdeaSelection,
            Self::Location => Stage::LocationSelection,
            Self::Vendor => Stage::VendorSelection,
            Self::Schedule => Stage::ScheduleApproval,
        }
    }
}

impl fmt::Display for SelectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown selection type '{s}'"))
    }
}
