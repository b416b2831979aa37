// Round domain types
//
// A round does not own its puzzles; puzzles point back via round_id.
// Round status is derived: Solved iff the round has at least one meta puzzle
// and every meta puzzle is Solved.

use serde::{Deserialize, Serialize};

use crate::ids::RoundId;
use crate::puzzle::Puzzle;

/// Round completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoundStatus {
    #[default]
    #[serde(rename = "Open")]
    Open,
    #[serde(rename = "Solved")]
    Solved,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Solved => write!(f, "Solved"),
        }
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Solved" => Ok(Self::Solved),
            other => Err(format!("unknown round status: {other}")),
        }
    }
}

/// A named grouping of puzzles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub name: String,
    #[serde(default)]
    pub status: RoundStatus,
}

impl Round {
    pub fn new(id: RoundId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: RoundStatus::Open,
        }
    }

    /// Compute the status this round should have given the hunt's puzzles.
    ///
    /// Puzzles belonging to other rounds are ignored, so callers may pass the
    /// whole hunt.
    pub fn completion_status<'a>(&self, puzzles: impl IntoIterator<Item = &'a Puzzle>) -> RoundStatus {
        let mut metas = 0usize;
        let mut all_solved = true;
        for puzzle in puzzles
            .into_iter()
            .filter(|p| p.round_id == self.id && p.is_meta)
        {
            metas += 1;
            all_solved &= puzzle.is_solved();
        }

        if metas > 0 && all_solved {
            RoundStatus::Solved
        } else {
            RoundStatus::Open
        }
    }

    /// Recompute and store the status. Returns the new status if it changed.
    pub fn reevaluate<'a>(&mut self, puzzles: impl IntoIterator<Item = &'a Puzzle>) -> Option<RoundStatus> {
        let status = self.completion_status(puzzles);
        if status == self.status {
            None
        } else {
            self.status = status;
            Some(status)
        }
    }
}
