//! Serializable reservation transactions against PostgreSQL.
//!
//! Every allocation decision runs inside one [`PgTx`], opened with
//! `SET TRANSACTION ISOLATION LEVEL SERIALIZABLE` before its first read. The
//! expiry sweep (`delete_expired`) runs outside any allocation transaction so
//! a slow sweep never widens the serializable window.

use super::Database;
use crate::error::StoreResult;
use crate::store::{ProblemLoad, ProblemStatement, Reservation, ReservationStore, StoreTx};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

const PROBLEM_COLUMNS: &str = "id, ord, title, objective, is_active, is_current, \
                               max_submissions, submission_count";

impl ReservationStore for Database {
    type Tx = PgTx;

    async fn begin(&self) -> StoreResult<PgTx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(PgTx { tx })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM problem_reservations WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// An open `SERIALIZABLE` transaction. Rolled back on drop unless committed.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl StoreTx for PgTx {
    async fn find_reservation(&mut self, session_id: &str) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, Reservation>(
            "SELECT session_id, problem_statement_id, expires_at, extension_count, created_at
             FROM problem_reservations WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn problem(&mut self, problem_id: i64) -> StoreResult<Option<ProblemStatement>> {
        let sql = format!(
            "SELECT {} FROM problem_statements WHERE id = $1",
            PROBLEM_COLUMNS
        );
        let row = sqlx::query_as::<_, ProblemStatement>(&sql)
            .bind(problem_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn active_problem_loads(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<ProblemLoad>> {
        let rows = sqlx::query_as::<_, ProblemLoad>(
            "SELECT p.id, p.ord, p.title, p.objective, p.is_active, p.is_current,
                    p.max_submissions, p.submission_count,
                    COUNT(r.session_id) FILTER (WHERE r.expires_at >= $1) AS live_reservations
             FROM problem_statements p
             LEFT JOIN problem_reservations r ON r.problem_statement_id = p.id
             WHERE p.is_active
             GROUP BY p.id
             ORDER BY p.ord",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn raise_capacity(&mut self, ceiling: i32) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE problem_statements SET max_submissions = $1
             WHERE is_active AND max_submissions < $1",
        )
        .bind(ceiling)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_current(&mut self, problem_id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE problem_statements SET is_current = (id = $1)
             WHERE is_current OR id = $1",
        )
        .bind(problem_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO problem_reservations
               (session_id, problem_statement_id, expires_at, extension_count, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&reservation.session_id)
        .bind(reservation.problem_statement_id)
        .bind(reservation.expires_at)
        .bind(reservation.extension_count)
        .bind(reservation.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_reservation(
        &mut self,
        session_id: &str,
        expires_at: DateTime<Utc>,
        extension_count: i32,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE problem_reservations SET expires_at = $2, extension_count = $3
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(expires_at)
        .bind(extension_count)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_reservation(&mut self, session_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM problem_reservations WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_submission(&mut self, problem_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE problem_statements SET submission_count = submission_count + 1
             WHERE id = $1 AND submission_count < max_submissions",
        )
        .bind(problem_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
