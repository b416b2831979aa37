// Solver domain types

use serde::{Deserialize, Serialize};

use crate::ids::{PuzzleId, SolverId};

/// A participant who can work on one puzzle at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solver {
    pub id: SolverId,
    /// Account name, matched against document edit actors
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_puzzle: Option<PuzzleId>,
}

impl Solver {
    pub fn new(id: SolverId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            full_name: None,
            current_puzzle: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Whether the solver is currently assigned to `puzzle`.
    pub fn is_on(&self, puzzle: PuzzleId) -> bool {
        self.current_puzzle == Some(puzzle)
    }

    /// Clear the assignment if it points at `puzzle`.
    pub fn leave(&mut self, puzzle: PuzzleId) -> bool {
        if self.is_on(puzzle) {
            self.current_puzzle = None;
            true
        } else {
            false
        }
    }
}
