//! Poll cycle and worker pool
//!
//! This module provides:
//! - [`Poller`] - Top-level loop: reload config, snapshot, fan out, report, sleep
//! - [`WorkerPool`] - Fixed set of workers draining one bounded queue per cycle
//! - [`PuzzleHandler`] - The per-puzzle unit of work, implemented by the reconciler
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Poller                          │
//! │   refresh config ─► snapshot ─► drop solved ─► report    │
//! │                          │                               │
//! │                          ▼                               │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        bounded queue (capacity = worker_count)     │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │        │              │                    │             │
//! │        ▼              ▼                    ▼             │
//! │   [Worker 1]     [Worker 2]    ...    [Worker N]         │
//! │        └──────────────┴─────── join ───────┘             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use huntbot_engine::worker::{Poller, WorkerPool};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let pool = WorkerPool::new(Arc::new(reconciler), shutdown_rx.clone());
//! let poller = Poller::new(ctx, store, pool, stats, shutdown_rx);
//!
//! poller.run().await;
//! ```

mod poller;
mod pool;

pub use poller::{CycleReport, Poller, PollerError};
pub use pool::{CycleStats, PuzzleHandler, WorkerPool, WorkerPoolConfig, WorkerPoolError};
