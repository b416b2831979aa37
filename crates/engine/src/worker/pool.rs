//! Worker pool for per-puzzle reconciliation
//!
//! A fixed number of workers drain one bounded queue per cycle. The cycle
//! ends when every worker has seen the queue closed and empty; joining the
//! workers is the only synchronization.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use huntbot_core::{BotConfig, Puzzle};

use crate::reconciler::{ReconcileError, ReconcileReport, Reconciler};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers, also the queue capacity
    pub worker_count: usize,

    /// Pause a worker takes after each puzzle
    #[serde(with = "crate::duration_millis")]
    pub puzzle_pause: Duration,

    /// Consecutive store faults that abort the cycle
    pub storage_failure_limit: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

impl WorkerPoolConfig {
    /// Pool settings from the current bot configuration
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            worker_count: config.worker_count.max(1),
            puzzle_pause: config.puzzle_pause,
            storage_failure_limit: config.storage_failure_limit.max(1),
        }
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the per-puzzle pause
    pub fn with_puzzle_pause(mut self, pause: Duration) -> Self {
        self.puzzle_pause = pause;
        self
    }

    /// Set the storage failure limit
    pub fn with_storage_failure_limit(mut self, limit: usize) -> Self {
        self.storage_failure_limit = limit.max(1);
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// A worker task ended abnormally
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Unit of work run by each worker
#[async_trait]
pub trait PuzzleHandler: Send + Sync + 'static {
    async fn handle(&self, puzzle: &Puzzle) -> Result<ReconcileReport, ReconcileError>;
}

#[async_trait]
impl PuzzleHandler for Reconciler {
    async fn handle(&self, puzzle: &Puzzle) -> Result<ReconcileReport, ReconcileError> {
        self.reconcile(puzzle).await
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Puzzles handed to the pool
    pub queued: usize,
    /// Passes that completed
    pub reconciled: usize,
    /// Passes skipped for quota exhaustion
    pub skipped: usize,
    /// Passes that returned an error
    pub failed: usize,
    /// Passes that panicked
    pub panicked: usize,
    /// Failed passes caused by a store fault
    pub store_faults: usize,
    /// Puzzles dropped after an abort or shutdown
    pub unprocessed: usize,
    pub recorded: usize,
    pub assigned: usize,
    pub abandoned: usize,
    /// Cycle stopped early on repeated store faults
    pub aborted: bool,
}

impl CycleStats {
    /// Passes that ran to an outcome
    pub fn processed(&self) -> usize {
        self.reconciled + self.skipped + self.failed + self.panicked
    }

    fn absorb(&mut self, report: &ReconcileReport) {
        if report.skipped.is_some() {
            self.skipped += 1;
        } else {
            self.reconciled += 1;
        }
        self.recorded += report.recorded;
        self.assigned += report.assigned;
        self.abandoned += usize::from(report.abandoned);
    }
}

struct CycleState {
    stats: Mutex<CycleStats>,
    consecutive_faults: AtomicUsize,
    aborted: AtomicBool,
    storage_failure_limit: usize,
}

impl CycleState {
    fn halted(&self, shutdown: &watch::Receiver<bool>) -> bool {
        self.aborted.load(Ordering::SeqCst) || *shutdown.borrow()
    }

    fn record_fault(&self) {
        let faults = self.consecutive_faults.fetch_add(1, Ordering::SeqCst) + 1;
        if faults >= self.storage_failure_limit && !self.aborted.swap(true, Ordering::SeqCst) {
            error!(
                consecutive_faults = faults,
                "Store appears to be down, aborting cycle"
            );
            self.stats.lock().aborted = true;
        }
    }
}

/// Runs one cycle's worth of puzzles across a fixed set of workers
///
/// # Example
///
/// ```ignore
/// use huntbot_engine::worker::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(Arc::new(reconciler), shutdown_rx);
/// let stats = pool
///     .run_cycle(WorkerPoolConfig::default().with_worker_count(4), puzzles)
///     .await?;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    handler: Arc<dyn PuzzleHandler>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    pub fn new(handler: Arc<dyn PuzzleHandler>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handler,
            shutdown_rx,
        }
    }

    /// Reconcile every puzzle, returning once all workers have finished
    pub async fn run_cycle(
        &self,
        config: WorkerPoolConfig,
        puzzles: Vec<Puzzle>,
    ) -> Result<CycleStats, WorkerPoolError> {
        let worker_count = config.worker_count.max(1);
        let state = Arc::new(CycleState {
            stats: Mutex::new(CycleStats {
                queued: puzzles.len(),
                ..Default::default()
            }),
            consecutive_faults: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            storage_failure_limit: config.storage_failure_limit.max(1),
        });

        let (tx, rx) = mpsc::channel::<Puzzle>(worker_count);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&self.handler),
                Arc::clone(&rx),
                Arc::clone(&state),
                self.shutdown_rx.clone(),
                config.puzzle_pause,
            ));
        }

        let mut remaining = puzzles.into_iter();
        for puzzle in remaining.by_ref() {
            if state.halted(&self.shutdown_rx) {
                state.stats.lock().unprocessed += 1;
                break;
            }
            if tx.send(puzzle).await.is_err() {
                break;
            }
        }
        let leftover = remaining.count();
        drop(tx);

        let mut join_error = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
                join_error = Some(e.to_string());
            }
        }

        let mut stats = state.stats.lock().clone();
        stats.unprocessed += leftover;
        if let Some(e) = join_error {
            return Err(WorkerPoolError::Worker(e));
        }

        debug!(
            queued = stats.queued,
            processed = stats.processed(),
            unprocessed = stats.unprocessed,
            aborted = stats.aborted,
            "Worker pool drained"
        );
        Ok(stats)
    }
}

async fn run_worker(
    worker_id: usize,
    handler: Arc<dyn PuzzleHandler>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Puzzle>>>,
    state: Arc<CycleState>,
    mut shutdown_rx: watch::Receiver<bool>,
    puzzle_pause: Duration,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(puzzle) = next else {
            break;
        };

        // Keep draining so the producer never blocks, but do no more work
        if state.halted(&shutdown_rx) {
            state.stats.lock().unprocessed += 1;
            continue;
        }

        let outcome = AssertUnwindSafe(handler.handle(&puzzle)).catch_unwind().await;
        match outcome {
            Ok(Ok(report)) => {
                state.consecutive_faults.store(0, Ordering::SeqCst);
                state.stats.lock().absorb(&report);
            }
            Ok(Err(e)) => {
                let fault = e.is_store_fault();
                {
                    let mut stats = state.stats.lock();
                    stats.failed += 1;
                    stats.store_faults += usize::from(fault);
                }
                if fault {
                    error!(worker_id, puzzle_id = %puzzle.id, error = %e, "Reconcile failed on store fault");
                    state.record_fault();
                } else {
                    state.consecutive_faults.store(0, Ordering::SeqCst);
                    warn!(worker_id, puzzle_id = %puzzle.id, error = %e, "Reconcile failed, skipping puzzle");
                }
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(worker_id, puzzle_id = %puzzle.id, panic = %message, "Reconcile panicked");
                state.stats.lock().panicked += 1;
            }
        }

        if !puzzle_pause.is_zero() && !state.halted(&shutdown_rx) {
            tokio::select! {
                _ = tokio::time::sleep(puzzle_pause) => {}
                _ = shutdown_rx.changed() => {
                    info!(worker_id, "Shutdown requested, draining queue");
                }
            }
        }
    }

    debug!(worker_id, "Worker exited");
}
