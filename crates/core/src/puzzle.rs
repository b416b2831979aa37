// Puzzle domain types
//
// The Puzzle is the owning record for assignment state. Every store backend
// mutates it only through the methods below, which hold these rules:
// - solver_history never loses a member
// - current_solvers never holds a duplicate
// - the document watermark and last_activity only move forward
// - document_activity_mode only moves Legacy -> Metadata

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityStamp;
use crate::ids::{PuzzleId, RoundId, SolverId};

/// Puzzle workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PuzzleStatus {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Being worked")]
    BeingWorked,
    #[serde(rename = "Needs eyes")]
    NeedsEyes,
    #[serde(rename = "Critical")]
    Critical,
    #[serde(rename = "WTF")]
    Wtf,
    #[serde(rename = "Under control")]
    UnderControl,
    #[serde(rename = "Waiting for HQ")]
    WaitingForHq,
    #[serde(rename = "Grind")]
    Grind,
    #[serde(rename = "Abandoned")]
    Abandoned,
    #[serde(rename = "Solved")]
    Solved,
    #[serde(rename = "Unnecessary")]
    Unnecessary,
    #[serde(rename = "Speculative")]
    Speculative,
    #[serde(rename = "Hidden")]
    Hidden,
}

impl PuzzleStatus {
    pub const ALL: [PuzzleStatus; 13] = [
        Self::New,
        Self::BeingWorked,
        Self::NeedsEyes,
        Self::Critical,
        Self::Wtf,
        Self::UnderControl,
        Self::WaitingForHq,
        Self::Grind,
        Self::Abandoned,
        Self::Solved,
        Self::Unnecessary,
        Self::Speculative,
        Self::Hidden,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::BeingWorked => "Being worked",
            Self::NeedsEyes => "Needs eyes",
            Self::Critical => "Critical",
            Self::Wtf => "WTF",
            Self::UnderControl => "Under control",
            Self::WaitingForHq => "Waiting for HQ",
            Self::Grind => "Grind",
            Self::Abandoned => "Abandoned",
            Self::Solved => "Solved",
            Self::Unnecessary => "Unnecessary",
            Self::Speculative => "Speculative",
            Self::Hidden => "Hidden",
        }
    }

    /// Statuses that an assignment promotes to "Being worked".
    pub fn promotes_on_assign(self) -> bool {
        matches!(self, Self::New | Self::Abandoned)
    }
}

impl std::fmt::Display for PuzzleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not one of the known statuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown puzzle status: {0}")]
pub struct PuzzleStatusParseError(pub String);

impl std::str::FromStr for PuzzleStatus {
    type Err = PuzzleStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| PuzzleStatusParseError(s.to_string()))
    }
}

/// How edit activity is tracked on the puzzle's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentActivityMode {
    /// Per-editor timestamps kept in document metadata.
    Metadata,
    /// Revision history of the document.
    #[default]
    Legacy,
}

impl std::fmt::Display for DocumentActivityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl std::str::FromStr for DocumentActivityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(Self::Metadata),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown document activity mode: {other}")),
        }
    }
}

/// Assigning a solver to a solved puzzle is a logic error, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("puzzle {0} is already solved")]
pub struct PuzzleSolved(pub PuzzleId);

/// What an assignment changed on the puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignChange {
    /// Solver was added to current_solvers
    pub joined: bool,
    /// Solver was added to solver_history for the first time
    pub first_visit: bool,
    /// Status transition, if the assignment promoted the puzzle
    pub status_changed: Option<(PuzzleStatus, PuzzleStatus)>,
}

impl AssignChange {
    pub fn is_noop(&self) -> bool {
        !self.joined && !self.first_visit && self.status_changed.is_none()
    }
}

/// A puzzle in the hunt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: PuzzleId,
    pub name: String,
    pub status: PuzzleStatus,
    pub round_id: RoundId,
    #[serde(default)]
    pub is_meta: bool,
    #[serde(default)]
    pub current_solvers: BTreeSet<SolverId>,
    #[serde(default)]
    pub solver_history: BTreeSet<SolverId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<ActivityStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_document_activity: Option<ActivityStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,
    #[serde(default)]
    pub document_activity_mode: DocumentActivityMode,
    /// Number of segments (sheets) last seen in the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_meta_count: Option<u32>,
}

impl Puzzle {
    /// Create a new puzzle with status `New` and no activity.
    pub fn new(id: PuzzleId, name: impl Into<String>, round_id: RoundId) -> Self {
        Self {
            id,
            name: name.into(),
            status: PuzzleStatus::New,
            round_id,
            is_meta: false,
            current_solvers: BTreeSet::new(),
            solver_history: BTreeSet::new(),
            last_activity: None,
            last_document_activity: None,
            document_ref: None,
            document_activity_mode: DocumentActivityMode::Legacy,
            document_meta_count: None,
        }
    }

    pub fn with_meta(mut self, is_meta: bool) -> Self {
        self.is_meta = is_meta;
        self
    }

    pub fn with_status(mut self, status: PuzzleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_document(mut self, document_ref: impl Into<String>) -> Self {
        self.document_ref = Some(document_ref.into());
        self
    }

    pub fn with_activity_mode(mut self, mode: DocumentActivityMode) -> Self {
        self.document_activity_mode = mode;
        self
    }

    pub fn is_solved(&self) -> bool {
        self.status == PuzzleStatus::Solved
    }

    /// Timestamp of the most recently processed document edit.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.last_document_activity.as_ref().map(|a| a.timestamp)
    }

    /// Add a solver to the puzzle's current solvers and history.
    ///
    /// Idempotent: a second call with no intervening change returns a no-op
    /// change. Promotes `New`/`Abandoned` to `Being worked`.
    pub fn add_solver(&mut self, solver: SolverId) -> Result<AssignChange, PuzzleSolved> {
        if self.is_solved() {
            return Err(PuzzleSolved(self.id));
        }

        let joined = self.current_solvers.insert(solver);
        let first_visit = self.solver_history.insert(solver);
        let status_changed = if self.status.promotes_on_assign() {
            let from = self.status;
            self.status = PuzzleStatus::BeingWorked;
            Some((from, PuzzleStatus::BeingWorked))
        } else {
            None
        };

        Ok(AssignChange {
            joined,
            first_visit,
            status_changed,
        })
    }

    /// Remove a solver from current solvers. History is untouched.
    ///
    /// Returns true if the solver was present.
    pub fn remove_solver(&mut self, solver: SolverId) -> bool {
        self.current_solvers.remove(&solver)
    }

    /// Apply an activity stamp.
    ///
    /// `last_activity` advances for every kind; the document watermark
    /// advances only for document edits. Neither moves backwards.
    /// Returns true if the watermark moved.
    pub fn record(&mut self, stamp: ActivityStamp) -> bool {
        let watermark_moved = if stamp.kind.is_document_edit() {
            advance(&mut self.last_document_activity, stamp.clone())
        } else {
            false
        };
        advance(&mut self.last_activity, stamp);
        watermark_moved
    }

    /// Set the status, returning the previous status if it changed.
    pub fn set_status(&mut self, status: PuzzleStatus) -> Option<PuzzleStatus> {
        if self.status == status {
            return None;
        }
        let previous = self.status;
        self.status = status;
        Some(previous)
    }

    /// Upgrade document tracking from legacy to metadata. Never downgrades.
    ///
    /// Returns true if the mode changed.
    pub fn upgrade_activity_mode(&mut self) -> bool {
        if self.document_activity_mode == DocumentActivityMode::Legacy {
            self.document_activity_mode = DocumentActivityMode::Metadata;
            true
        } else {
            false
        }
    }

    /// Whether the puzzle has gone stale while nobody is on it.
    ///
    /// A puzzle with no recorded activity is never due: absence of data is
    /// not evidence of abandonment.
    pub fn abandonment_due(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.status != PuzzleStatus::BeingWorked || !self.current_solvers.is_empty() {
            return false;
        }
        let Some(last) = &self.last_activity else {
            return false;
        };
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last.timestamp) > timeout
    }
}

fn advance(slot: &mut Option<ActivityStamp>, stamp: ActivityStamp) -> bool {
    match slot {
        Some(current) if current.timestamp > stamp.timestamp => false,
        _ => {
            *slot = Some(stamp);
            true
        }
    }
}
