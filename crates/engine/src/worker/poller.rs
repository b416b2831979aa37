//! Top-level poll cycle
//!
//! Each cycle reloads configuration, snapshots the hunt, fans the open
//! puzzles out to the worker pool, reports timings, then sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::pool::{CycleStats, WorkerPool, WorkerPoolConfig, WorkerPoolError};
use crate::context::SchedulerContext;
use crate::persistence::{AssignmentStore, StoreError};
use crate::stats::{keys, StatsReporter};

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Snapshot failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker pool failed
    #[error("worker pool error: {0}")]
    Pool(#[from] WorkerPoolError),
}

/// Timings and counters for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Config reload plus snapshot
    pub setup: Duration,
    /// Time the worker pool ran
    pub processing: Duration,
    /// Open puzzles in the cycle
    pub puzzle_count: usize,
    /// Quota failures since startup
    pub quota_failures: u64,
    pub stats: CycleStats,
}

impl CycleReport {
    /// Mean processing time per puzzle, zero for an empty cycle
    pub fn average_per_puzzle(&self) -> Duration {
        if self.puzzle_count == 0 {
            Duration::ZERO
        } else {
            self.processing / self.puzzle_count as u32
        }
    }
}

/// Drives poll cycles until shutdown
pub struct Poller {
    ctx: Arc<SchedulerContext>,
    store: Arc<dyn AssignmentStore>,
    pool: WorkerPool,
    stats: Arc<dyn StatsReporter>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Poller {
    pub fn new(
        ctx: Arc<SchedulerContext>,
        store: Arc<dyn AssignmentStore>,
        pool: WorkerPool,
        stats: Arc<dyn StatsReporter>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            store,
            pool,
            stats,
            shutdown_rx,
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run cycles until shutdown is signalled.
    ///
    /// A failed cycle is logged and the loop carries on after the usual
    /// pause.
    pub async fn run(&self) {
        info!("Poller started");
        let mut shutdown_rx = self.shutdown_rx.clone();

        while !self.is_shutdown() {
            match self.run_once().await {
                Ok(report) => info!(
                    puzzles = report.puzzle_count,
                    setup_ms = report.setup.as_millis() as u64,
                    processing_ms = report.processing.as_millis() as u64,
                    recorded = report.stats.recorded,
                    assigned = report.stats.assigned,
                    abandoned = report.stats.abandoned,
                    failed = report.stats.failed,
                    aborted = report.stats.aborted,
                    "Cycle complete"
                ),
                Err(e) => error!(error = %e, "Cycle failed"),
            }

            if self.is_shutdown() {
                break;
            }
            let pause = self.ctx.config().cycle_pause;
            debug!(pause_secs = pause.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        info!("Poller stopped");
    }

    /// Run a single cycle
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<CycleReport, PollerError> {
        let started = Instant::now();

        let config = match self.ctx.refresh().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping previous settings");
                self.ctx.config()
            }
        };

        let snapshot = self.store.snapshot().await?;
        let open: Vec<_> = snapshot.open_puzzles().cloned().collect();
        let puzzle_count = open.len();
        let setup = started.elapsed();
        debug!(puzzles = puzzle_count, rounds = snapshot.rounds.len(), "Snapshot taken");

        let processing_started = Instant::now();
        let stats = self
            .pool
            .run_cycle(WorkerPoolConfig::from_config(&config), open)
            .await?;
        let processing = processing_started.elapsed();

        let report = CycleReport {
            setup,
            processing,
            puzzle_count,
            quota_failures: self.ctx.quota_failures(),
            stats,
        };
        self.report(&report).await;
        Ok(report)
    }

    async fn report(&self, report: &CycleReport) {
        let values = [
            (keys::LOOP_TIME_SETUP, report.setup.as_secs_f64()),
            (keys::LOOP_TIME_PROCESSING, report.processing.as_secs_f64()),
            (keys::LOOP_TIME_AVG, report.average_per_puzzle().as_secs_f64()),
            (keys::LOOP_PUZZLE_COUNT, report.puzzle_count as f64),
            (keys::QUOTA_FAILURES, report.quota_failures as f64),
        ];
        for (key, value) in values {
            if let Err(e) = self.stats.report(key, value).await {
                warn!(stat = key, error = %e, "Failed to report stat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use huntbot_core::{BotConfig, Puzzle, PuzzleId, PuzzleStatus, RoundId, StaticConfigSource};

    use super::*;
    use crate::persistence::InMemoryAssignmentStore;
    use crate::reconciler::{ReconcileError, ReconcileReport};
    use crate::stats::InMemoryStatsReporter;
    use crate::worker::PuzzleHandler;

    /// Takes one second per puzzle
    #[derive(Default)]
    struct SlowHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PuzzleHandler for SlowHandler {
        async fn handle(&self, puzzle: &Puzzle) -> Result<ReconcileReport, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(ReconcileReport {
                puzzle_id: puzzle.id,
                mode: None,
                events_seen: 0,
                recorded: 0,
                assigned: 0,
                abandoned: false,
                skipped: None,
            })
        }
    }

    struct Fixture {
        store: Arc<InMemoryAssignmentStore>,
        handler: Arc<SlowHandler>,
        stats: Arc<InMemoryStatsReporter>,
        shutdown: watch::Sender<bool>,
        poller: Poller,
    }

    fn fixture(source: StaticConfigSource) -> Fixture {
        let store = Arc::new(InMemoryAssignmentStore::new());
        store.insert_puzzle(Puzzle::new(PuzzleId(1), "a", RoundId(1)));
        store.insert_puzzle(Puzzle::new(PuzzleId(2), "b", RoundId(1)));
        store.insert_puzzle(
            Puzzle::new(PuzzleId(3), "c", RoundId(1)).with_status(PuzzleStatus::Solved),
        );

        let ctx = Arc::new(SchedulerContext::new(BotConfig::default(), Arc::new(source)));
        let handler = Arc::new(SlowHandler::default());
        let stats = Arc::new(InMemoryStatsReporter::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(handler.clone(), shutdown_rx.clone());
        let poller = Poller::new(ctx, store.clone(), pool, stats.clone(), shutdown_rx);

        Fixture {
            store,
            handler,
            stats,
            shutdown,
            poller,
        }
    }

    fn quick_config() -> StaticConfigSource {
        StaticConfigSource::default()
            .with("worker_count", "1")
            .with("puzzle_pause_ms", "0")
            .with("cycle_pause_secs", "30")
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_solved_and_reports_stats() {
        let f = fixture(quick_config());

        let report = f.poller.run_once().await.unwrap();

        assert_eq!(report.puzzle_count, 2);
        assert_eq!(report.stats.reconciled, 2);
        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 2);
        assert!(report.processing >= Duration::from_secs(2));
        assert!(report.average_per_puzzle() >= Duration::from_secs(1));

        assert_eq!(f.stats.get(keys::LOOP_PUZZLE_COUNT), Some(2.0));
        assert_eq!(f.stats.get(keys::QUOTA_FAILURES), Some(0.0));
        assert!(f.stats.get(keys::LOOP_TIME_PROCESSING).unwrap() >= 2.0);
        assert_eq!(f.stats.report_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_failure_is_an_error() {
        let f = fixture(quick_config());
        f.store.set_unavailable(true);

        let err = f.poller.run_once().await.unwrap_err();
        assert!(matches!(err, PollerError::Store(_)));
        assert_eq!(f.stats.report_count(), 0);
    }

    #[test]
    fn test_average_of_empty_cycle() {
        let report = CycleReport {
            setup: Duration::from_millis(5),
            processing: Duration::from_millis(7),
            puzzle_count: 0,
            quota_failures: 0,
            stats: CycleStats::default(),
        };
        assert_eq!(report.average_per_puzzle(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(quick_config());
        let poller = Arc::new(f.poller);

        let running = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.run().await })
        };

        // First cycle takes two seconds, then the poller sleeps 30s
        tokio::time::sleep(Duration::from_secs(5)).await;
        f.shutdown.send(true).unwrap();
        running.await.unwrap();

        assert_eq!(f.handler.calls.load(Ordering::SeqCst), 2);
    }
}
