//! # Store — Durable Reservation Records and Capacity Counters
//!
//! The allocation engine never talks SQL directly. It drives a
//! [`ReservationStore`], which hands out [`StoreTx`] transactions that must be
//! **serializable**: every read-decide-write sequence the coordinator performs
//! inside one `StoreTx` behaves as if no other transaction ran concurrently.
//! A store that cannot prove this aborts one side with
//! [`StoreError::Conflict`](crate::error::StoreError::Conflict) and the
//! coordinator retries.
//!
//! Implementations:
//!
//! - [`crate::db::Database`]: PostgreSQL, `SERIALIZABLE` isolation.
//! - [`MemoryStore`]: in-process, one global lock per transaction. Used by
//!   tests and by single-node demos.
//!
//! Dropping a `StoreTx` without calling [`StoreTx::commit`] rolls it back.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;

// ── Rows ────────────────────────────────────────────────────────

/// A problem statement teams can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProblemStatement {
    pub id: i64,
    /// Rotation and display position, 1..N.
    #[sqlx(rename = "ord")]
    pub order: i32,
    pub title: String,
    pub objective: String,
    pub is_active: bool,
    /// UI highlight only. Never consulted for allocation.
    pub is_current: bool,
    pub max_submissions: i32,
    pub submission_count: i32,
}

/// A time-boxed hold of one session on one problem statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub session_id: String,
    pub problem_statement_id: i64,
    pub expires_at: DateTime<Utc>,
    pub extension_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// A reservation counts toward load until the instant it expires.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

/// An active problem statement together with its live reservation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProblemLoad {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub problem: ProblemStatement,
    pub live_reservations: i64,
}

impl ProblemLoad {
    /// Confirmed submissions plus live holds.
    pub fn total_committed(&self) -> i64 {
        i64::from(self.problem.submission_count) + self.live_reservations
    }
}

// ── Traits ──────────────────────────────────────────────────────

/// Entry point to the durable store.
pub trait ReservationStore: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a serializable transaction.
    fn begin(&self) -> impl Future<Output = StoreResult<Self::Tx>> + Send;

    /// Delete every reservation with `expires_at < now`. Runs in its own
    /// short transaction; deleting an already-deleted row is a no-op.
    fn delete_expired(&self, now: DateTime<Utc>) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Cheap connectivity probe for readiness checks.
    fn health_check(&self) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Operations available inside one serializable transaction.
pub trait StoreTx: Send + Sized {
    /// The reservation row for `session_id`, live or not.
    fn find_reservation(
        &mut self,
        session_id: &str,
    ) -> impl Future<Output = StoreResult<Option<Reservation>>> + Send;

    fn problem(
        &mut self,
        problem_id: i64,
    ) -> impl Future<Output = StoreResult<Option<ProblemStatement>>> + Send;

    /// Every active problem ordered by `order`, with reservations live at `now`.
    fn active_problem_loads(
        &mut self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Vec<ProblemLoad>>> + Send;

    /// Raise `max_submissions` of every active problem below `ceiling` to `ceiling`.
    /// Returns how many rows changed.
    fn raise_capacity(&mut self, ceiling: i32) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Move the `is_current` pointer to `problem_id`.
    fn mark_current(&mut self, problem_id: i64) -> impl Future<Output = StoreResult<()>> + Send;

    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn update_reservation(
        &mut self,
        session_id: &str,
        expires_at: DateTime<Utc>,
        extension_count: i32,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Returns whether a row was deleted.
    fn delete_reservation(
        &mut self,
        session_id: &str,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Increment `submission_count` unless it already equals `max_submissions`.
    /// Returns whether the increment happened.
    fn record_submission(
        &mut self,
        problem_id: i64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn commit(self) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Read the current load picture in a throwaway transaction.
///
/// Used by status endpoints and gauges; allocation decisions never use it
/// because the snapshot is stale the moment the transaction rolls back.
pub async fn load_snapshot<S: ReservationStore>(
    store: &S,
    now: DateTime<Utc>,
) -> StoreResult<Vec<ProblemLoad>> {
    let mut tx = store.begin().await?;
    let loads = tx.active_problem_loads(now).await?;
    drop(tx);
    Ok(loads)
}
