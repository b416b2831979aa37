//! AssignmentStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use huntbot_core::{
    ActivityKind, ActivityOrigin, ActivityRecord, AssignChange, Puzzle, PuzzleId, PuzzleSolved,
    PuzzleStatus, Round, RoundId, RoundStatus, Solver, SolverId,
};

/// Error type for store operations
///
/// Logic errors (not found, already solved) are expected during normal
/// operation and are never retried. Faults mean the backing store itself is
/// unhealthy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Puzzle not found
    #[error("puzzle not found: {0}")]
    PuzzleNotFound(PuzzleId),

    /// Solver not found
    #[error("solver not found: {0}")]
    SolverNotFound(SolverId),

    /// Round not found
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    /// Assignment attempted on a solved puzzle
    #[error("puzzle {0} is already solved")]
    AlreadySolved(PuzzleId),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this error means the store is unhealthy, as opposed to an
    /// expected logic condition.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_))
    }
}

impl From<PuzzleSolved> for StoreError {
    fn from(e: PuzzleSolved) -> Self {
        Self::AlreadySolved(e.0)
    }
}

/// Every round and puzzle in the hunt at one instant
#[derive(Debug, Clone, Default)]
pub struct HuntSnapshot {
    pub rounds: Vec<Round>,
    pub puzzles: Vec<Puzzle>,
}

impl HuntSnapshot {
    /// Puzzles that still need reconciling
    pub fn open_puzzles(&self) -> impl Iterator<Item = &Puzzle> {
        self.puzzles.iter().filter(|p| !p.is_solved())
    }
}

/// An activity to append to the log
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub puzzle_id: PuzzleId,
    pub solver_id: SolverId,
    pub source: ActivityOrigin,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

impl NewActivity {
    /// A document edit observed by the bot
    pub fn document_edit(puzzle_id: PuzzleId, solver_id: SolverId, timestamp: DateTime<Utc>) -> Self {
        Self {
            puzzle_id,
            solver_id,
            source: ActivityOrigin::Document,
            kind: ActivityKind::Revise,
            timestamp,
        }
    }

    pub fn into_record(self) -> ActivityRecord {
        ActivityRecord::new(
            self.puzzle_id,
            self.solver_id,
            self.source,
            self.kind,
            self.timestamp,
        )
    }
}

/// What an assignment did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignOutcome {
    /// Puzzle the solver was moved off, if any
    pub previous_puzzle: Option<PuzzleId>,
    /// Change applied to the target puzzle
    pub change: AssignChange,
}

impl AssignOutcome {
    pub fn is_noop(&self) -> bool {
        self.previous_puzzle.is_none() && self.change.is_noop()
    }
}

/// Parameters of the abandonment check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonmentPolicy {
    /// Idle time after which an unattended puzzle counts as abandoned
    pub timeout: Duration,
    /// Status the puzzle moves to
    pub target_status: PuzzleStatus,
}

impl Default for AbandonmentPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            target_status: PuzzleStatus::Abandoned,
        }
    }
}

/// Store for puzzle, round and solver state
///
/// The only writer of the hunt aggregates. Each mutating operation executes
/// as a single logical transaction and applies the transition rules defined
/// on the domain types. Implementations must be thread-safe.
#[async_trait]
pub trait AssignmentStore: Send + Sync + 'static {
    // =========================================================================
    // Reads
    // =========================================================================

    /// All rounds and puzzles
    async fn snapshot(&self) -> Result<HuntSnapshot, StoreError>;

    /// Fresh copy of one puzzle
    async fn get_puzzle(&self, puzzle_id: PuzzleId) -> Result<Puzzle, StoreError>;

    /// Fresh copy of one round
    async fn get_round(&self, round_id: RoundId) -> Result<Round, StoreError>;

    /// Fresh copy of one solver
    async fn get_solver(&self, solver_id: SolverId) -> Result<Solver, StoreError>;

    /// Look a solver up by account name. `Ok(None)` when no such solver.
    async fn find_solver_by_name(&self, name: &str) -> Result<Option<Solver>, StoreError>;

    /// Timestamp of the solver's most recent activity on any puzzle
    async fn solver_last_activity(
        &self,
        solver_id: SolverId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Put a solver on a puzzle, moving them off any other puzzle first.
    ///
    /// Fails with [`StoreError::AlreadySolved`] for a solved puzzle.
    async fn assign(
        &self,
        solver_id: SolverId,
        puzzle_id: PuzzleId,
    ) -> Result<AssignOutcome, StoreError>;

    /// Take a solver off a puzzle. History is untouched.
    ///
    /// Returns true if the solver was on the puzzle.
    async fn unassign(&self, solver_id: SolverId, puzzle_id: PuzzleId) -> Result<bool, StoreError>;

    // =========================================================================
    // Activity
    // =========================================================================

    /// Append an activity record and advance the puzzle's activity stamps
    async fn record_activity(&self, activity: NewActivity) -> Result<ActivityRecord, StoreError>;

    // =========================================================================
    // Status
    // =========================================================================

    /// Set a puzzle's status and re-run the round check.
    ///
    /// Returns the previous status if it changed.
    async fn set_puzzle_status(
        &self,
        puzzle_id: PuzzleId,
        status: PuzzleStatus,
    ) -> Result<Option<PuzzleStatus>, StoreError>;

    /// Flag or unflag a puzzle as its round's meta and re-run the round check
    async fn set_puzzle_meta(&self, puzzle_id: PuzzleId, is_meta: bool) -> Result<(), StoreError>;

    /// Recompute a round's status from its meta puzzles
    async fn check_round_completion(&self, round_id: RoundId) -> Result<RoundStatus, StoreError>;

    /// Demote a stale, unattended "Being worked" puzzle.
    ///
    /// Returns true if the puzzle was demoted.
    async fn check_abandonment(
        &self,
        puzzle_id: PuzzleId,
        policy: AbandonmentPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // =========================================================================
    // Document tracking
    // =========================================================================

    /// Record the document's current segment count
    async fn set_document_meta_count(
        &self,
        puzzle_id: PuzzleId,
        count: u32,
    ) -> Result<(), StoreError>;

    /// Switch a puzzle from legacy to metadata tracking. Never downgrades.
    ///
    /// Returns true if the mode changed.
    async fn upgrade_activity_mode(&self, puzzle_id: PuzzleId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        assert!(StoreError::Database("down".into()).is_fault());
        assert!(StoreError::Serialization("bad json".into()).is_fault());
        assert!(!StoreError::AlreadySolved(PuzzleId(1)).is_fault());
        assert!(!StoreError::SolverNotFound(SolverId(1)).is_fault());
    }

    #[test]
    fn test_open_puzzles_skips_solved() {
        let snapshot = HuntSnapshot {
            rounds: vec![],
            puzzles: vec![
                Puzzle::new(PuzzleId(1), "a", RoundId(1)),
                Puzzle::new(PuzzleId(2), "b", RoundId(1)).with_status(PuzzleStatus::Solved),
                Puzzle::new(PuzzleId(3), "c", RoundId(1)).with_status(PuzzleStatus::Critical),
            ],
        };
        let open: Vec<_> = snapshot.open_puzzles().map(|p| p.id).collect();
        assert_eq!(open, vec![PuzzleId(1), PuzzleId(3)]);
    }
}
