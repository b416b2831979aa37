//! PostgreSQL implementation of AssignmentStore
//!
//! Every mutating operation runs in one transaction and locks the rows it
//! reads before writing them back, so two workers touching the same solver
//! or puzzle serialize instead of overwriting each other.
//!
//! Rows are always locked in the same order: solver, then puzzles by
//! ascending id, then round.
//!
//! Expected tables:
//!
//! ```sql
//! CREATE TABLE round (
//!     id BIGINT PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'Open'
//! );
//! CREATE TABLE puzzle (
//!     id BIGINT PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'New',
//!     round_id BIGINT NOT NULL REFERENCES round (id),
//!     is_meta BOOLEAN NOT NULL DEFAULT FALSE,
//!     current_solvers JSONB NOT NULL DEFAULT '[]',
//!     solver_history JSONB NOT NULL DEFAULT '[]',
//!     last_activity JSONB,
//!     last_document_activity JSONB,
//!     document_ref TEXT,
//!     document_activity_mode TEXT NOT NULL DEFAULT 'legacy',
//!     document_meta_count INTEGER
//! );
//! CREATE TABLE solver (
//!     id BIGINT PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     full_name TEXT,
//!     current_puzzle BIGINT REFERENCES puzzle (id)
//! );
//! CREATE TABLE activity (
//!     id UUID PRIMARY KEY,
//!     time TIMESTAMPTZ NOT NULL,
//!     solver_id BIGINT NOT NULL REFERENCES solver (id),
//!     puzzle_id BIGINT NOT NULL REFERENCES puzzle (id),
//!     source TEXT NOT NULL,
//!     kind TEXT NOT NULL
//! );
//! CREATE TABLE config (
//!     key TEXT PRIMARY KEY,
//!     val TEXT NOT NULL
//! );
//! ```

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, info, instrument};

use huntbot_core::{
    ActivityRecord, ActivityStamp, ConfigError, ConfigSource, Puzzle, PuzzleId, PuzzleStatus,
    Round, RoundId, RoundStatus, Solver, SolverId,
};

use super::store::*;

const PUZZLE_COLUMNS: &str = "id, name, status, round_id, is_meta, current_solvers, \
     solver_history, last_activity, last_document_activity, document_ref, \
     document_activity_mode, document_meta_count";

/// PostgreSQL implementation of AssignmentStore
///
/// # Example
///
/// ```ignore
/// use huntbot_engine::PostgresAssignmentStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/puzzleboss").await?;
/// let store = PostgresAssignmentStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresAssignmentStore {
    pool: PgPool,
}

impl PostgresAssignmentStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Config source reading the shared `config` table
    pub fn config_source(&self) -> PostgresConfigSource {
        PostgresConfigSource::new(self.pool.clone())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            StoreError::Database(e.to_string())
        })
    }
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        error!("{}: {}", context, e);
        StoreError::Database(e.to_string())
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(db_err("Failed to commit transaction"))
}

// =============================================================================
// Row mapping
// =============================================================================

fn decode_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn puzzle_from_row(row: &PgRow) -> Result<Puzzle, StoreError> {
    let status: String = row.get("status");
    let mode: String = row.get("document_activity_mode");
    let current: serde_json::Value = row.get("current_solvers");
    let history: serde_json::Value = row.get("solver_history");
    let last_activity: Option<serde_json::Value> = row.get("last_activity");
    let last_document_activity: Option<serde_json::Value> = row.get("last_document_activity");
    let meta_count: Option<i32> = row.get("document_meta_count");

    Ok(Puzzle {
        id: PuzzleId(row.get("id")),
        name: row.get("name"),
        status: status
            .parse()
            .map_err(|e: huntbot_core::PuzzleStatusParseError| {
                StoreError::Serialization(e.to_string())
            })?,
        round_id: RoundId(row.get("round_id")),
        is_meta: row.get("is_meta"),
        current_solvers: decode_json::<BTreeSet<SolverId>>(current)?,
        solver_history: decode_json::<BTreeSet<SolverId>>(history)?,
        last_activity: last_activity.map(decode_json::<ActivityStamp>).transpose()?,
        last_document_activity: last_document_activity
            .map(decode_json::<ActivityStamp>)
            .transpose()?,
        document_ref: row.get("document_ref"),
        document_activity_mode: mode.parse().map_err(StoreError::Serialization)?,
        document_meta_count: meta_count.map(|c| c.max(0) as u32),
    })
}

fn round_from_row(row: &PgRow) -> Result<Round, StoreError> {
    let status: String = row.get("status");
    Ok(Round {
        id: RoundId(row.get("id")),
        name: row.get("name"),
        status: status.parse().map_err(StoreError::Serialization)?,
    })
}

fn solver_from_row(row: &PgRow) -> Solver {
    let current: Option<i64> = row.get("current_puzzle");
    Solver {
        id: SolverId(row.get("id")),
        name: row.get("name"),
        full_name: row.get("full_name"),
        current_puzzle: current.map(PuzzleId),
    }
}

// =============================================================================
// Locked reads and write-backs
// =============================================================================

async fn lock_puzzle(
    tx: &mut Transaction<'static, Postgres>,
    puzzle_id: PuzzleId,
) -> Result<Puzzle, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {PUZZLE_COLUMNS} FROM puzzle WHERE id = $1 FOR UPDATE"
    ))
    .bind(puzzle_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err("Failed to lock puzzle"))?
    .ok_or(StoreError::PuzzleNotFound(puzzle_id))?;
    puzzle_from_row(&row)
}

async fn lock_puzzles(
    tx: &mut Transaction<'static, Postgres>,
    ids: &[i64],
) -> Result<HashMap<PuzzleId, Puzzle>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {PUZZLE_COLUMNS} FROM puzzle WHERE id = ANY($1) ORDER BY id FOR UPDATE"
    ))
    .bind(ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_err("Failed to lock puzzles"))?;

    rows.iter()
        .map(|row| puzzle_from_row(row).map(|p| (p.id, p)))
        .collect()
}

async fn lock_solver(
    tx: &mut Transaction<'static, Postgres>,
    solver_id: SolverId,
) -> Result<Solver, StoreError> {
    let row = sqlx::query(
        "SELECT id, name, full_name, current_puzzle FROM solver WHERE id = $1 FOR UPDATE",
    )
    .bind(solver_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err("Failed to lock solver"))?
    .ok_or(StoreError::SolverNotFound(solver_id))?;
    Ok(solver_from_row(&row))
}

async fn write_puzzle(
    tx: &mut Transaction<'static, Postgres>,
    puzzle: &Puzzle,
) -> Result<(), StoreError> {
    let last_activity = puzzle.last_activity.as_ref().map(encode_json).transpose()?;
    let last_document_activity = puzzle
        .last_document_activity
        .as_ref()
        .map(encode_json)
        .transpose()?;

    sqlx::query(
        r#"
        UPDATE puzzle
        SET status = $2,
            is_meta = $3,
            current_solvers = $4,
            solver_history = $5,
            last_activity = $6,
            last_document_activity = $7,
            document_activity_mode = $8,
            document_meta_count = $9
        WHERE id = $1
        "#,
    )
    .bind(puzzle.id.0)
    .bind(puzzle.status.as_str())
    .bind(puzzle.is_meta)
    .bind(encode_json(&puzzle.current_solvers)?)
    .bind(encode_json(&puzzle.solver_history)?)
    .bind(last_activity)
    .bind(last_document_activity)
    .bind(puzzle.document_activity_mode.to_string())
    .bind(puzzle.document_meta_count.map(|c| c as i32))
    .execute(&mut **tx)
    .await
    .map_err(db_err("Failed to write puzzle"))?;
    Ok(())
}

/// Lock the round, recompute its status from committed puzzle state plus
/// this transaction's writes, and store it.
async fn reevaluate_round(
    tx: &mut Transaction<'static, Postgres>,
    round_id: RoundId,
) -> Result<RoundStatus, StoreError> {
    let row = sqlx::query("SELECT id, name, status FROM round WHERE id = $1 FOR UPDATE")
        .bind(round_id.0)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err("Failed to lock round"))?
        .ok_or(StoreError::RoundNotFound(round_id))?;
    let mut round = round_from_row(&row)?;

    let rows = sqlx::query(&format!(
        "SELECT {PUZZLE_COLUMNS} FROM puzzle WHERE round_id = $1 AND is_meta"
    ))
    .bind(round_id.0)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_err("Failed to load round metas"))?;
    let metas = rows
        .iter()
        .map(puzzle_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(status) = round.reevaluate(&metas) {
        sqlx::query("UPDATE round SET status = $2 WHERE id = $1")
            .bind(round_id.0)
            .bind(status.to_string())
            .execute(&mut **tx)
            .await
            .map_err(db_err("Failed to update round status"))?;
        info!(round_id = %round_id, %status, "Round status changed");
    }
    Ok(round.status)
}

/// Round check that tolerates a puzzle pointing at a missing round
async fn reevaluate_owning_round(
    tx: &mut Transaction<'static, Postgres>,
    round_id: RoundId,
) -> Result<(), StoreError> {
    match reevaluate_round(tx, round_id).await {
        Ok(_) | Err(StoreError::RoundNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl AssignmentStore for PostgresAssignmentStore {
    #[instrument(skip(self))]
    async fn snapshot(&self) -> Result<HuntSnapshot, StoreError> {
        let round_rows = sqlx::query("SELECT id, name, status FROM round ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to load rounds"))?;
        let puzzle_rows = sqlx::query(&format!(
            "SELECT {PUZZLE_COLUMNS} FROM puzzle ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load puzzles"))?;

        Ok(HuntSnapshot {
            rounds: round_rows
                .iter()
                .map(round_from_row)
                .collect::<Result<_, _>>()?,
            puzzles: puzzle_rows
                .iter()
                .map(puzzle_from_row)
                .collect::<Result<_, _>>()?,
        })
    }

    #[instrument(skip(self))]
    async fn get_puzzle(&self, puzzle_id: PuzzleId) -> Result<Puzzle, StoreError> {
        let row = sqlx::query(&format!("SELECT {PUZZLE_COLUMNS} FROM puzzle WHERE id = $1"))
            .bind(puzzle_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to get puzzle"))?
            .ok_or(StoreError::PuzzleNotFound(puzzle_id))?;
        puzzle_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_round(&self, round_id: RoundId) -> Result<Round, StoreError> {
        let row = sqlx::query("SELECT id, name, status FROM round WHERE id = $1")
            .bind(round_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to get round"))?
            .ok_or(StoreError::RoundNotFound(round_id))?;
        round_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_solver(&self, solver_id: SolverId) -> Result<Solver, StoreError> {
        let row =
            sqlx::query("SELECT id, name, full_name, current_puzzle FROM solver WHERE id = $1")
                .bind(solver_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("Failed to get solver"))?
                .ok_or(StoreError::SolverNotFound(solver_id))?;
        Ok(solver_from_row(&row))
    }

    #[instrument(skip(self))]
    async fn find_solver_by_name(&self, name: &str) -> Result<Option<Solver>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, full_name, current_puzzle FROM solver WHERE lower(name) = lower($1)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to find solver"))?;
        Ok(row.as_ref().map(solver_from_row))
    }

    #[instrument(skip(self))]
    async fn solver_last_activity(
        &self,
        solver_id: SolverId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT MAX(time) AS last FROM activity WHERE solver_id = $1")
            .bind(solver_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to get solver activity"))?;
        Ok(row.get("last"))
    }

    #[instrument(skip(self))]
    async fn assign(
        &self,
        solver_id: SolverId,
        puzzle_id: PuzzleId,
    ) -> Result<AssignOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let mut solver = lock_solver(&mut tx, solver_id).await?;
        let previous_puzzle = solver.current_puzzle.filter(|p| *p != puzzle_id);

        let mut ids = vec![puzzle_id.0];
        ids.extend(previous_puzzle.map(|p| p.0));
        let mut puzzles = lock_puzzles(&mut tx, &ids).await?;

        let mut target = puzzles
            .remove(&puzzle_id)
            .ok_or(StoreError::PuzzleNotFound(puzzle_id))?;
        // Dropping the transaction rolls back, leaving the old assignment intact
        let change = target.add_solver(solver_id)?;

        if let Some(mut old) = previous_puzzle.and_then(|p| puzzles.remove(&p)) {
            if old.remove_solver(solver_id) {
                write_puzzle(&mut tx, &old).await?;
            }
        }

        if !change.is_noop() {
            write_puzzle(&mut tx, &target).await?;
        }
        if !solver.is_on(puzzle_id) {
            solver.current_puzzle = Some(puzzle_id);
            sqlx::query("UPDATE solver SET current_puzzle = $2 WHERE id = $1")
                .bind(solver_id.0)
                .bind(puzzle_id.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err("Failed to update solver"))?;
        }
        if change.status_changed.is_some() {
            reevaluate_owning_round(&mut tx, target.round_id).await?;
        }

        commit(tx).await?;
        debug!(%solver_id, %puzzle_id, ?previous_puzzle, "assigned solver");
        Ok(AssignOutcome {
            previous_puzzle,
            change,
        })
    }

    #[instrument(skip(self))]
    async fn unassign(&self, solver_id: SolverId, puzzle_id: PuzzleId) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let solver = match lock_solver(&mut tx, solver_id).await {
            Ok(solver) => Some(solver),
            Err(StoreError::SolverNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let mut puzzle = lock_puzzle(&mut tx, puzzle_id).await?;
        let removed = puzzle.remove_solver(solver_id);
        if removed {
            write_puzzle(&mut tx, &puzzle).await?;
        }
        if let Some(mut solver) = solver {
            if solver.leave(puzzle_id) {
                sqlx::query("UPDATE solver SET current_puzzle = NULL WHERE id = $1")
                    .bind(solver_id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("Failed to update solver"))?;
            }
        }

        commit(tx).await?;
        Ok(removed)
    }

    #[instrument(skip(self, activity), fields(puzzle_id = %activity.puzzle_id, solver_id = %activity.solver_id))]
    async fn record_activity(&self, activity: NewActivity) -> Result<ActivityRecord, StoreError> {
        let mut tx = self.begin().await?;

        let mut puzzle = lock_puzzle(&mut tx, activity.puzzle_id).await?;
        let record = activity.into_record();

        sqlx::query(
            r#"
            INSERT INTO activity (id, time, solver_id, puzzle_id, source, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(record.solver_id.0)
        .bind(record.puzzle_id.0)
        .bind(record.source.to_string())
        .bind(record.kind.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let unknown_solver = matches!(
                &e,
                sqlx::Error::Database(db) if db.is_foreign_key_violation()
            );
            if unknown_solver {
                StoreError::SolverNotFound(record.solver_id)
            } else {
                db_err("Failed to insert activity")(e)
            }
        })?;

        puzzle.record(record.stamp());
        write_puzzle(&mut tx, &puzzle).await?;

        commit(tx).await?;
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn set_puzzle_status(
        &self,
        puzzle_id: PuzzleId,
        status: PuzzleStatus,
    ) -> Result<Option<PuzzleStatus>, StoreError> {
        let mut tx = self.begin().await?;

        let mut puzzle = lock_puzzle(&mut tx, puzzle_id).await?;
        let previous = puzzle.set_status(status);
        if previous.is_some() {
            write_puzzle(&mut tx, &puzzle).await?;
            reevaluate_owning_round(&mut tx, puzzle.round_id).await?;
        }

        commit(tx).await?;
        Ok(previous)
    }

    #[instrument(skip(self))]
    async fn set_puzzle_meta(&self, puzzle_id: PuzzleId, is_meta: bool) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let mut puzzle = lock_puzzle(&mut tx, puzzle_id).await?;
        puzzle.is_meta = is_meta;
        write_puzzle(&mut tx, &puzzle).await?;
        reevaluate_owning_round(&mut tx, puzzle.round_id).await?;

        commit(tx).await
    }

    #[instrument(skip(self))]
    async fn check_round_completion(&self, round_id: RoundId) -> Result<RoundStatus, StoreError> {
        let mut tx = self.begin().await?;
        let status = reevaluate_round(&mut tx, round_id).await?;
        commit(tx).await?;
        Ok(status)
    }

    #[instrument(skip(self))]
    async fn check_abandonment(
        &self,
        puzzle_id: PuzzleId,
        policy: AbandonmentPolicy,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let mut puzzle = lock_puzzle(&mut tx, puzzle_id).await?;
        if !puzzle.abandonment_due(now, policy.timeout) {
            return Ok(false);
        }
        let demoted = puzzle.set_status(policy.target_status).is_some();
        if demoted {
            write_puzzle(&mut tx, &puzzle).await?;
            reevaluate_owning_round(&mut tx, puzzle.round_id).await?;
        }

        commit(tx).await?;
        Ok(demoted)
    }

    #[instrument(skip(self))]
    async fn set_document_meta_count(
        &self,
        puzzle_id: PuzzleId,
        count: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE puzzle SET document_meta_count = $2 WHERE id = $1")
            .bind(puzzle_id.0)
            .bind(count as i32)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to set document meta count"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PuzzleNotFound(puzzle_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upgrade_activity_mode(&self, puzzle_id: PuzzleId) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let mut puzzle = lock_puzzle(&mut tx, puzzle_id).await?;
        let upgraded = puzzle.upgrade_activity_mode();
        if upgraded {
            write_puzzle(&mut tx, &puzzle).await?;
        }

        commit(tx).await?;
        Ok(upgraded)
    }
}

/// Reads bot settings from the shared `config` table
#[derive(Clone)]
pub struct PostgresConfigSource {
    pool: PgPool,
}

impl PostgresConfigSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigSource for PostgresConfigSource {
    async fn load(&self) -> Result<HashMap<String, String>, ConfigError> {
        let rows = sqlx::query("SELECT key, val FROM config")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to load config: {}", e);
                ConfigError::Unavailable(e.to_string())
            })?;

        Ok(rows
            .iter()
            .map(|row| (row.get("key"), row.get("val")))
            .collect())
    }
}
