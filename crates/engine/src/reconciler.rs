//! Per-puzzle reconciliation
//!
//! One pass over one puzzle: fetch document activity, record what is new,
//! auto-assign solvers seen editing, then check for abandonment. Everything
//! within a pass runs in sequence; passes for different puzzles run
//! concurrently on the worker pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use huntbot_core::{DocumentActivityMode, Puzzle, PuzzleId};

use crate::activity::{ActivityError, ActivityFetch, ActivitySource};
use crate::context::SchedulerContext;
use crate::persistence::{AbandonmentPolicy, AssignmentStore, NewActivity, StoreError};

/// Clock used for abandonment checks
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Errors that end a reconcile pass early
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Activity fetch failed for a non-quota reason
    #[error("activity fetch failed: {0}")]
    Activity(#[from] ActivityError),

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the backing store itself failed during the pass
    pub fn is_store_fault(&self) -> bool {
        match self {
            Self::Store(e) | Self::Activity(ActivityError::Store(e)) => e.is_fault(),
            Self::Activity(_) => false,
        }
    }
}

/// Why a pass stopped without finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Quota retries ran out; the puzzle is retried next cycle
    QuotaExhausted { attempts: u32 },
}

/// What one reconcile pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub puzzle_id: PuzzleId,
    /// Tracking mode of the fetch, if one was made
    pub mode: Option<DocumentActivityMode>,
    /// Edit events returned by the activity source
    pub events_seen: usize,
    /// Activity records written
    pub recorded: usize,
    /// Assignments that changed something
    pub assigned: usize,
    pub abandoned: bool,
    pub skipped: Option<SkipReason>,
}

impl ReconcileReport {
    fn new(puzzle_id: PuzzleId) -> Self {
        Self {
            puzzle_id,
            mode: None,
            events_seen: 0,
            recorded: 0,
            assigned: 0,
            abandoned: false,
            skipped: None,
        }
    }
}

/// Runs the reconcile pass for one puzzle at a time
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn AssignmentStore>,
    source: ActivitySource,
    ctx: Arc<SchedulerContext>,
    clock: Clock,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        source: ActivitySource,
        ctx: Arc<SchedulerContext>,
    ) -> Self {
        Self {
            store,
            source,
            ctx,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used for abandonment checks
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Reconcile one puzzle from its cycle snapshot
    #[instrument(skip(self, puzzle), fields(puzzle_id = %puzzle.id, puzzle = %puzzle.name))]
    pub async fn reconcile(&self, puzzle: &Puzzle) -> Result<ReconcileReport, ReconcileError> {
        let config = self.ctx.config();
        let mut report = ReconcileReport::new(puzzle.id);

        let fetch = match self.fetch(puzzle).await {
            Ok(fetch) => fetch,
            Err(ActivityError::GaveUp {
                operation,
                attempts,
                last_error,
            }) => {
                warn!(operation, attempts, error = %last_error, "Quota exhausted, skipping puzzle this cycle");
                report.skipped = Some(SkipReason::QuotaExhausted { attempts });
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(fetch) = fetch {
            report.mode = Some(fetch.mode());
            report.events_seen = fetch.events().len();

            if let Some(count) = fetch.document_meta_count() {
                if puzzle.document_meta_count != Some(count) {
                    self.store.set_document_meta_count(puzzle.id, count).await?;
                    debug!(segments = count, "Document segment count changed");
                }
            }

            self.apply_events(puzzle.id, fetch, config.auto_assign, &config.bot_identity, &mut report)
                .await?;
        }

        let policy = AbandonmentPolicy {
            timeout: config.abandonment_timeout,
            target_status: config.abandonment_status,
        };
        report.abandoned = self
            .store
            .check_abandonment(puzzle.id, policy, (self.clock)())
            .await?;
        if report.abandoned {
            info!(status = %policy.target_status, "Puzzle abandoned");
        }

        Ok(report)
    }

    /// `None` when the puzzle has no document
    async fn fetch(&self, puzzle: &Puzzle) -> Result<Option<ActivityFetch>, ActivityError> {
        if puzzle.document_ref.is_none() {
            return Ok(None);
        }
        if puzzle.document_activity_mode == DocumentActivityMode::Legacy {
            if let Some(fetch) = self
                .source
                .upgrade_if_available(puzzle, self.store.as_ref())
                .await?
            {
                return Ok(Some(fetch));
            }
        }
        self.source.fetch(puzzle).await.map(Some)
    }

    async fn apply_events(
        &self,
        puzzle_id: PuzzleId,
        fetch: ActivityFetch,
        auto_assign: bool,
        bot_identity: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        let watermark = self.store.get_puzzle(puzzle_id).await?.watermark();

        let mut events = fetch.into_events();
        events.sort_by_key(|e| e.timestamp);

        for event in events {
            if event.actor_name.eq_ignore_ascii_case(bot_identity) {
                continue;
            }
            if watermark.is_some_and(|w| event.timestamp <= w) {
                continue;
            }

            let Some(solver) = self.store.find_solver_by_name(&event.actor_name).await? else {
                debug!(actor = %event.actor_name, "Edit by unknown actor, skipping");
                continue;
            };

            // Read before recording, or the new record would always be the latest
            let prior = self.store.solver_last_activity(solver.id).await?;

            self.store
                .record_activity(NewActivity::document_edit(
                    puzzle_id,
                    solver.id,
                    event.timestamp,
                ))
                .await?;
            report.recorded += 1;

            let newest = prior.map_or(true, |p| event.timestamp > p);
            if !auto_assign || solver.is_on(puzzle_id) || !newest {
                continue;
            }

            match self.store.assign(solver.id, puzzle_id).await {
                Ok(outcome) if !outcome.is_noop() => {
                    report.assigned += 1;
                    info!(
                        solver = %solver.name,
                        previous_puzzle = ?outcome.previous_puzzle,
                        "Auto-assigned solver from document edit"
                    );
                }
                Ok(_) => {}
                Err(StoreError::AlreadySolved(_)) => {
                    info!(solver = %solver.name, "Puzzle already solved, not assigning");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
