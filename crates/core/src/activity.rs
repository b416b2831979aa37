// Activity domain types
//
// ActivityRecord is the append-only log entry written by the assignment store.
// EditEvent is the normalized, ephemeral shape produced by the activity source
// regardless of which tracking mode observed the edit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{PuzzleId, SolverId};

/// Where an activity was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOrigin {
    /// The hunt web application itself.
    Puzzleboss,
    /// This bot, acting on its own behalf.
    Bot,
    /// Chat channels.
    Discord,
    /// The puzzle's shared document.
    Document,
}

impl std::fmt::Display for ActivityOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Puzzleboss => write!(f, "puzzleboss"),
            Self::Bot => write!(f, "bot"),
            Self::Discord => write!(f, "discord"),
            Self::Document => write!(f, "document"),
        }
    }
}

impl std::str::FromStr for ActivityOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "puzzleboss" => Ok(Self::Puzzleboss),
            "bot" => Ok(Self::Bot),
            "discord" => Ok(Self::Discord),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown activity origin: {other}")),
        }
    }
}

/// What kind of activity happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Create,
    Open,
    /// An edit to the puzzle's document. The only kind that moves the watermark.
    Revise,
    Comment,
    Interact,
}

impl ActivityKind {
    /// Whether this kind is a document edit.
    pub fn is_document_edit(self) -> bool {
        matches!(self, Self::Revise)
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Open => write!(f, "open"),
            Self::Revise => write!(f, "revise"),
            Self::Comment => write!(f, "comment"),
            Self::Interact => write!(f, "interact"),
        }
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "open" => Ok(Self::Open),
            "revise" => Ok(Self::Revise),
            "comment" => Ok(Self::Comment),
            "interact" => Ok(Self::Interact),
            other => Err(format!("unknown activity kind: {other}")),
        }
    }
}

/// Summary of the latest activity on a puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStamp {
    pub actor: SolverId,
    pub source: ActivityOrigin,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

/// Immutable activity log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// UUID v7, so records sort by creation time
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub solver_id: SolverId,
    pub puzzle_id: PuzzleId,
    pub source: ActivityOrigin,
    pub kind: ActivityKind,
}

impl ActivityRecord {
    /// Create a new record with a fresh id.
    pub fn new(
        puzzle_id: PuzzleId,
        solver_id: SolverId,
        source: ActivityOrigin,
        kind: ActivityKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            solver_id,
            puzzle_id,
            source,
            kind,
        }
    }

    /// The stamp this record leaves on its puzzle.
    pub fn stamp(&self) -> ActivityStamp {
        ActivityStamp {
            actor: self.solver_id,
            source: self.source,
            kind: self.kind,
            timestamp: self.timestamp,
        }
    }
}

/// A single observed document edit, independent of the tracking mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
    pub actor_name: String,
    pub timestamp: DateTime<Utc>,
}

impl EditEvent {
    pub fn new(actor_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            actor_name: actor_name.into(),
            timestamp,
        }
    }
}
