//! # Hunt Activity Reconciliation Engine
//!
//! A polling engine that keeps puzzle-hunt assignment state in step with
//! what solvers are actually editing.
//!
//! ## Features
//!
//! - **Bounded worker pool**: one queue per cycle, drained by a fixed set of workers
//! - **Quota-aware fetching**: slot-reserving rate limiter and fixed-delay quota retries
//! - **Dual-mode activity**: document metadata or revision history, with one-way upgrade
//! - **Invariant-preserving store**: single active assignment per solver, monotonic
//!   history and watermark, round-completion cascade, abandonment
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Poller                              │
//! │  (reload config, snapshot hunt, report cycle stats)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (bounded queue, N workers, join as the wait-group)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Reconciler                            │
//! │  ActivitySource ─► RetryableClient ─► RateLimiter           │
//! │  AssignmentStore (PostgreSQL: round, puzzle, solver, ...)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use huntbot_engine::prelude::*;
//!
//! let ctx = Arc::new(SchedulerContext::new(BotConfig::default(), config_source));
//! let store: Arc<dyn AssignmentStore> = Arc::new(PostgresAssignmentStore::new(pool));
//! let source = ActivitySource::new(Arc::new(SheetsActivityTransport::new(token)), ctx.clone());
//! let reconciler = Reconciler::new(store.clone(), source, ctx.clone());
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let pool = WorkerPool::new(Arc::new(reconciler), shutdown_rx.clone());
//! Poller::new(ctx, store, pool, Arc::new(LogStatsReporter), shutdown_rx)
//!     .run()
//!     .await;
//! ```

pub mod activity;
pub mod context;
pub(crate) mod duration_millis;
pub mod persistence;
pub mod reconciler;
pub mod reliability;
pub mod stats;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        ActivityError, ActivityFetch, ActivitySource, ActivityTransport, SheetsActivityTransport,
    };
    pub use crate::context::SchedulerContext;
    pub use crate::persistence::{
        AssignmentStore, InMemoryAssignmentStore, PostgresAssignmentStore, StoreError,
    };
    pub use crate::reconciler::{ReconcileError, ReconcileReport, Reconciler};
    pub use crate::reliability::RetryPolicy;
    pub use crate::stats::{HttpStatsReporter, LogStatsReporter, StatsReporter};
    pub use crate::worker::{Poller, WorkerPool, WorkerPoolConfig};
    pub use huntbot_core::BotConfig;
}

// Re-export key types at crate root
pub use activity::{ActivityError, ActivityFetch, ActivitySource, SheetsActivityTransport};
pub use context::SchedulerContext;
pub use persistence::{
    AbandonmentPolicy, AssignmentStore, HuntSnapshot, InMemoryAssignmentStore, NewActivity,
    PostgresAssignmentStore, PostgresConfigSource, StoreError,
};
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler, SkipReason};
pub use reliability::{CallOutcome, RateLimiter, RetryPolicy, RetryableClient};
pub use stats::{HttpStatsReporter, InMemoryStatsReporter, LogStatsReporter, StatsReporter};
pub use worker::{CycleReport, CycleStats, Poller, PollerError, WorkerPool, WorkerPoolConfig};
