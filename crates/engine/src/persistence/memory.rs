//! In-memory implementation of AssignmentStore for testing
//!
//! Every operation takes one write lock over the whole hunt, so each mutation
//! is atomic with respect to every other.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use huntbot_core::{
    ActivityRecord, Puzzle, PuzzleId, PuzzleStatus, Round, RoundId, RoundStatus, Solver, SolverId,
};

use super::store::*;

#[derive(Default)]
struct HuntState {
    rounds: BTreeMap<RoundId, Round>,
    puzzles: BTreeMap<PuzzleId, Puzzle>,
    solvers: HashMap<SolverId, Solver>,
    activities: Vec<ActivityRecord>,
    unavailable: bool,
}

impl HuntState {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Database("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn puzzle(&self, id: PuzzleId) -> Result<&Puzzle, StoreError> {
        self.puzzles.get(&id).ok_or(StoreError::PuzzleNotFound(id))
    }

    fn puzzle_mut(&mut self, id: PuzzleId) -> Result<&mut Puzzle, StoreError> {
        self.puzzles.get_mut(&id).ok_or(StoreError::PuzzleNotFound(id))
    }

    fn solver_mut(&mut self, id: SolverId) -> Result<&mut Solver, StoreError> {
        self.solvers.get_mut(&id).ok_or(StoreError::SolverNotFound(id))
    }

    /// Recompute a round's status from the current puzzles
    fn reevaluate_round(&mut self, round_id: RoundId) -> Result<RoundStatus, StoreError> {
        let Self {
            rounds, puzzles, ..
        } = self;
        let round = rounds
            .get_mut(&round_id)
            .ok_or(StoreError::RoundNotFound(round_id))?;
        round.reevaluate(puzzles.values());
        Ok(round.status)
    }

    /// Status change that also keeps the owning round consistent
    fn change_status(
        &mut self,
        puzzle_id: PuzzleId,
        status: PuzzleStatus,
    ) -> Result<Option<PuzzleStatus>, StoreError> {
        let puzzle = self.puzzle_mut(puzzle_id)?;
        let round_id = puzzle.round_id;
        let previous = puzzle.set_status(status);
        if previous.is_some() && self.rounds.contains_key(&round_id) {
            self.reevaluate_round(round_id)?;
        }
        Ok(previous)
    }
}

/// In-memory implementation of AssignmentStore
///
/// This is primarily for testing. It holds the whole hunt in memory and
/// provides the same semantics as the PostgreSQL implementation.
///
/// # Example
///
/// ```
/// use huntbot_core::{Puzzle, PuzzleId, Round, RoundId};
/// use huntbot_engine::InMemoryAssignmentStore;
///
/// let store = InMemoryAssignmentStore::new();
/// store.insert_round(Round::new(RoundId(1), "Ocean"));
/// store.insert_puzzle(Puzzle::new(PuzzleId(1), "Whale Song", RoundId(1)));
/// assert_eq!(store.puzzle_count(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    state: RwLock<HuntState>,
}

impl InMemoryAssignmentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a round
    pub fn insert_round(&self, round: Round) {
        self.state.write().rounds.insert(round.id, round);
    }

    /// Add or replace a puzzle
    pub fn insert_puzzle(&self, puzzle: Puzzle) {
        self.state.write().puzzles.insert(puzzle.id, puzzle);
    }

    /// Add or replace a solver
    pub fn insert_solver(&self, solver: Solver) {
        self.state.write().solvers.insert(solver.id, solver);
    }

    /// Make every operation fail with a database error until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Get the number of puzzles
    pub fn puzzle_count(&self) -> usize {
        self.state.read().puzzles.len()
    }

    /// Copy of the activity log, oldest first
    pub fn activities(&self) -> Vec<ActivityRecord> {
        self.state.read().activities.clone()
    }

    /// Activity log entries for one puzzle
    pub fn activities_for(&self, puzzle_id: PuzzleId) -> Vec<ActivityRecord> {
        self.state
            .read()
            .activities
            .iter()
            .filter(|a| a.puzzle_id == puzzle_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn snapshot(&self) -> Result<HuntSnapshot, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        Ok(HuntSnapshot {
            rounds: state.rounds.values().cloned().collect(),
            puzzles: state.puzzles.values().cloned().collect(),
        })
    }

    async fn get_puzzle(&self, puzzle_id: PuzzleId) -> Result<Puzzle, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        state.puzzle(puzzle_id).cloned()
    }

    async fn get_round(&self, round_id: RoundId) -> Result<Round, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        state
            .rounds
            .get(&round_id)
            .cloned()
            .ok_or(StoreError::RoundNotFound(round_id))
    }

    async fn get_solver(&self, solver_id: SolverId) -> Result<Solver, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        state
            .solvers
            .get(&solver_id)
            .cloned()
            .ok_or(StoreError::SolverNotFound(solver_id))
    }

    async fn find_solver_by_name(&self, name: &str) -> Result<Option<Solver>, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        Ok(state
            .solvers
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn solver_last_activity(
        &self,
        solver_id: SolverId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.read();
        state.check_available()?;
        Ok(state
            .activities
            .iter()
            .filter(|a| a.solver_id == solver_id)
            .map(|a| a.timestamp)
            .max())
    }

    async fn assign(
        &self,
        solver_id: SolverId,
        puzzle_id: PuzzleId,
    ) -> Result<AssignOutcome, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;

        if state.puzzle(puzzle_id)?.is_solved() {
            return Err(StoreError::AlreadySolved(puzzle_id));
        }
        let previous_puzzle = state
            .solver_mut(solver_id)?
            .current_puzzle
            .filter(|p| *p != puzzle_id);

        if let Some(old) = previous_puzzle {
            if let Some(old_puzzle) = state.puzzles.get_mut(&old) {
                old_puzzle.remove_solver(solver_id);
            }
        }

        let puzzle = state.puzzle_mut(puzzle_id)?;
        let round_id = puzzle.round_id;
        let change = puzzle.add_solver(solver_id)?;
        state.solver_mut(solver_id)?.current_puzzle = Some(puzzle_id);

        if change.status_changed.is_some() && state.rounds.contains_key(&round_id) {
            state.reevaluate_round(round_id)?;
        }

        Ok(AssignOutcome {
            previous_puzzle,
            change,
        })
    }

    async fn unassign(&self, solver_id: SolverId, puzzle_id: PuzzleId) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;

        let removed = state.puzzle_mut(puzzle_id)?.remove_solver(solver_id);
        if let Some(solver) = state.solvers.get_mut(&solver_id) {
            solver.leave(puzzle_id);
        }
        Ok(removed)
    }

    async fn record_activity(&self, activity: NewActivity) -> Result<ActivityRecord, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;

        if !state.solvers.contains_key(&activity.solver_id) {
            return Err(StoreError::SolverNotFound(activity.solver_id));
        }
        let record = activity.into_record();
        state.puzzle_mut(record.puzzle_id)?.record(record.stamp());
        state.activities.push(record.clone());
        Ok(record)
    }

    async fn set_puzzle_status(
        &self,
        puzzle_id: PuzzleId,
        status: PuzzleStatus,
    ) -> Result<Option<PuzzleStatus>, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;
        state.change_status(puzzle_id, status)
    }

    async fn set_puzzle_meta(&self, puzzle_id: PuzzleId, is_meta: bool) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.check_available()?;

        let puzzle = state.puzzle_mut(puzzle_id)?;
        puzzle.is_meta = is_meta;
        let round_id = puzzle.round_id;
        if state.rounds.contains_key(&round_id) {
            state.reevaluate_round(round_id)?;
        }
        Ok(())
    }

    async fn check_round_completion(&self, round_id: RoundId) -> Result<RoundStatus, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;
        state.reevaluate_round(round_id)
    }

    async fn check_abandonment(
        &self,
        puzzle_id: PuzzleId,
        policy: AbandonmentPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;

        if !state.puzzle(puzzle_id)?.abandonment_due(now, policy.timeout) {
            return Ok(false);
        }
        Ok(state
            .change_status(puzzle_id, policy.target_status)?
            .is_some())
    }

    async fn set_document_meta_count(
        &self,
        puzzle_id: PuzzleId,
        count: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.check_available()?;
        state.puzzle_mut(puzzle_id)?.document_meta_count = Some(count);
        Ok(())
    }

    async fn upgrade_activity_mode(&self, puzzle_id: PuzzleId) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        state.check_available()?;
        Ok(state.puzzle_mut(puzzle_id)?.upgrade_activity_mode())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeZone;
    use huntbot_core::DocumentActivityMode;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn hunt() -> InMemoryAssignmentStore {
        let store = InMemoryAssignmentStore::new();
        store.insert_round(Round::new(RoundId(1), "Ocean"));
        store.insert_puzzle(Puzzle::new(PuzzleId(1), "Whale Song", RoundId(1)));
        store.insert_puzzle(Puzzle::new(PuzzleId(2), "Kelp Forest", RoundId(1)));
        store.insert_puzzle(
            Puzzle::new(PuzzleId(3), "Ocean Meta", RoundId(1)).with_meta(true),
        );
        store.insert_solver(Solver::new(SolverId(10), "alice"));
        store.insert_solver(Solver::new(SolverId(11), "bob"));
        store
    }

    #[tokio::test]
    async fn test_assign_promotes_and_records_history() {
        let store = hunt();

        let outcome = store.assign(SolverId(10), PuzzleId(1)).await.unwrap();
        assert!(outcome.change.joined);
        assert!(outcome.change.first_visit);
        assert_eq!(
            outcome.change.status_changed,
            Some((PuzzleStatus::New, PuzzleStatus::BeingWorked))
        );

        let puzzle = store.get_puzzle(PuzzleId(1)).await.unwrap();
        assert_eq!(puzzle.status, PuzzleStatus::BeingWorked);
        assert!(puzzle.current_solvers.contains(&SolverId(10)));
        assert!(puzzle.solver_history.contains(&SolverId(10)));
        let solver = store.get_solver(SolverId(10)).await.unwrap();
        assert_eq!(solver.current_puzzle, Some(PuzzleId(1)));
    }

    #[tokio::test]
    async fn test_assign_twice_is_noop() {
        let store = hunt();
        store.assign(SolverId(10), PuzzleId(1)).await.unwrap();
        let before = store.get_puzzle(PuzzleId(1)).await.unwrap();

        let outcome = store.assign(SolverId(10), PuzzleId(1)).await.unwrap();

        assert!(outcome.is_noop());
        assert_eq!(store.get_puzzle(PuzzleId(1)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reassign_moves_solver_and_keeps_history() {
        let store = hunt();
        store.assign(SolverId(10), PuzzleId(1)).await.unwrap();

        let outcome = store.assign(SolverId(10), PuzzleId(2)).await.unwrap();
        assert_eq!(outcome.previous_puzzle, Some(PuzzleId(1)));

        let first = store.get_puzzle(PuzzleId(1)).await.unwrap();
        let second = store.get_puzzle(PuzzleId(2)).await.unwrap();
        assert!(!first.current_solvers.contains(&SolverId(10)));
        assert!(first.solver_history.contains(&SolverId(10)));
        assert!(second.current_solvers.contains(&SolverId(10)));
        assert_eq!(
            store.get_solver(SolverId(10)).await.unwrap().current_puzzle,
            Some(PuzzleId(2))
        );
    }

    #[tokio::test]
    async fn test_assign_to_solved_puzzle_fails_without_side_effects() {
        let store = hunt();
        store.assign(SolverId(10), PuzzleId(1)).await.unwrap();
        store
            .set_puzzle_status(PuzzleId(2), PuzzleStatus::Solved)
            .await
            .unwrap();

        let err = store.assign(SolverId(10), PuzzleId(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadySolved(PuzzleId(2))));
        assert!(!err.is_fault());

        // Still on the original puzzle
        let first = store.get_puzzle(PuzzleId(1)).await.unwrap();
        assert!(first.current_solvers.contains(&SolverId(10)));
        assert!(store
            .get_puzzle(PuzzleId(2))
            .await
            .unwrap()
            .solver_history
            .is_empty());
    }

    #[tokio::test]
    async fn test_assign_unknown_solver() {
        let store = hunt();
        let err = store.assign(SolverId(99), PuzzleId(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::SolverNotFound(SolverId(99))));
        assert_eq!(
            store.get_puzzle(PuzzleId(1)).await.unwrap().status,
            PuzzleStatus::New
        );
    }

    #[tokio::test]
    async fn test_concurrent_assignments_keep_solver_on_one_puzzle() {
        let store = Arc::new(hunt());

        let mut handles = Vec::new();
        for round in 0..20 {
            let store = Arc::clone(&store);
            let target = if round % 2 == 0 { PuzzleId(1) } else { PuzzleId(2) };
            handles.push(tokio::spawn(async move {
                store.assign(SolverId(10), target).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let solver = store.get_solver(SolverId(10)).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        let holding: Vec<_> = snapshot
            .puzzles
            .iter()
            .filter(|p| p.current_solvers.contains(&SolverId(10)))
            .map(|p| p.id)
            .collect();
        assert_eq!(holding.len(), 1);
        assert_eq!(solver.current_puzzle, Some(holding[0]));
    }

    #[tokio::test]
    async fn test_unassign_keeps_history() {
        let store = hunt();
        store.assign(SolverId(10), PuzzleId(1)).await.unwrap();

        assert!(store.unassign(SolverId(10), PuzzleId(1)).await.unwrap());
        assert!(!store.unassign(SolverId(10), PuzzleId(1)).await.unwrap());

        let puzzle = store.get_puzzle(PuzzleId(1)).await.unwrap();
        assert!(puzzle.current_solvers.is_empty());
        assert!(puzzle.solver_history.contains(&SolverId(10)));
        assert_eq!(store.get_solver(SolverId(10)).await.unwrap().current_puzzle, None);
    }

    #[tokio::test]
    async fn test_record_activity_advances_watermark() {
        let store = hunt();
        store
            .record_activity(NewActivity::document_edit(PuzzleId(1), SolverId(10), at(100)))
            .await
            .unwrap();
        store
            .record_activity(NewActivity::document_edit(PuzzleId(1), SolverId(11), at(50)))
            .await
            .unwrap();

        let puzzle = store.get_puzzle(PuzzleId(1)).await.unwrap();
        assert_eq!(puzzle.watermark(), Some(at(100)));
        assert_eq!(store.activities_for(PuzzleId(1)).len(), 2);
        assert_eq!(
            store.solver_last_activity(SolverId(11)).await.unwrap(),
            Some(at(50))
        );
        assert_eq!(store.solver_last_activity(SolverId(12)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_meta_solve_cascades_to_round() {
        let store = hunt();
        store.set_puzzle_meta(PuzzleId(2), true).await.unwrap();

        store
            .set_puzzle_status(PuzzleId(3), PuzzleStatus::Solved)
            .await
            .unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Open
        );

        store
            .set_puzzle_status(PuzzleId(2), PuzzleStatus::Solved)
            .await
            .unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Solved
        );

        // Un-solving a meta reopens the round
        store
            .set_puzzle_status(PuzzleId(2), PuzzleStatus::Critical)
            .await
            .unwrap();
        assert_eq!(
            store.check_round_completion(RoundId(1)).await.unwrap(),
            RoundStatus::Open
        );
    }

    #[tokio::test]
    async fn test_new_unsolved_meta_reopens_solved_round() {
        let store = hunt();
        store
            .set_puzzle_status(PuzzleId(3), PuzzleStatus::Solved)
            .await
            .unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Solved
        );

        store.set_puzzle_meta(PuzzleId(1), true).await.unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Open
        );

        store
            .set_puzzle_status(PuzzleId(1), PuzzleStatus::Solved)
            .await
            .unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Solved
        );

        // Dropping an unsolved meta flag can also complete the round
        store.set_puzzle_meta(PuzzleId(2), true).await.unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Open
        );
        store.set_puzzle_meta(PuzzleId(2), false).await.unwrap();
        assert_eq!(
            store.get_round(RoundId(1)).await.unwrap().status,
            RoundStatus::Solved
        );
    }

    #[tokio::test]
    async fn test_abandonment_demotes_stale_unattended_puzzle() {
        let store = hunt();
        store.assign(SolverId(10), PuzzleId(1)).await.unwrap();
        store
            .record_activity(NewActivity::document_edit(PuzzleId(1), SolverId(10), at(0)))
            .await
            .unwrap();
        let policy = AbandonmentPolicy {
            timeout: Duration::from_secs(600),
            target_status: PuzzleStatus::Abandoned,
        };

        // Solver still present
        assert!(!store
            .check_abandonment(PuzzleId(1), policy, at(700))
            .await
            .unwrap());

        store.unassign(SolverId(10), PuzzleId(1)).await.unwrap();
        assert!(!store
            .check_abandonment(PuzzleId(1), policy, at(600))
            .await
            .unwrap());
        assert!(store
            .check_abandonment(PuzzleId(1), policy, at(601))
            .await
            .unwrap());
        assert_eq!(
            store.get_puzzle(PuzzleId(1)).await.unwrap().status,
            PuzzleStatus::Abandoned
        );
    }

    #[tokio::test]
    async fn test_activity_mode_upgrade_and_meta_count() {
        let store = hunt();
        assert!(store.upgrade_activity_mode(PuzzleId(1)).await.unwrap());
        assert!(!store.upgrade_activity_mode(PuzzleId(1)).await.unwrap());
        store.set_document_meta_count(PuzzleId(1), 4).await.unwrap();

        let puzzle = store.get_puzzle(PuzzleId(1)).await.unwrap();
        assert_eq!(puzzle.document_activity_mode, DocumentActivityMode::Metadata);
        assert_eq!(puzzle.document_meta_count, Some(4));
    }

    #[tokio::test]
    async fn test_find_solver_by_name_is_case_insensitive() {
        let store = hunt();
        let found = store.find_solver_by_name("Alice").await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(SolverId(10)));
        assert!(store.find_solver_by_name("mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_faults() {
        let store = hunt();
        store.set_unavailable(true);
        let err = store.snapshot().await.unwrap_err();
        assert!(err.is_fault());

        store.set_unavailable(false);
        assert!(store.snapshot().await.is_ok());
    }
}
