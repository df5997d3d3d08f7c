//! # Database — PostgreSQL Reservation Store
//!
//! Production implementation of [`ReservationStore`](crate::store::ReservationStore)
//! on top of `sqlx::PgPool`.
//!
//! ## Schema
//!
//! - `problem_statements`: ord, title, objective, is_active, is_current,
//!   max_submissions, submission_count
//! - `problem_reservations`: session_id (PK), problem_statement_id, expires_at,
//!   extension_count
//!
//! Both tables are created by the embedded migrations in `migrations/`, applied
//! by [`Database::migrate`]. Every statement is idempotent, so `serve` runs them
//! on each startup.
//!
//! ## Isolation
//!
//! Allocation transactions run at `SERIALIZABLE`. PostgreSQL's SSI aborts one of
//! two transactions that both read a problem's load and both insert a hold on
//! it; the abort surfaces as SQLSTATE 40001 and the coordinator retries.

mod reservations;

pub use reservations::PgTx;

use crate::config::ProblemSeed;
use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

const MIGRATIONS: [(&str, &str); 2] = [
    (
        "001_problem_statements",
        include_str!("../../migrations/001_problem_statements.sql"),
    ),
    (
        "002_problem_reservations",
        include_str!("../../migrations/002_problem_reservations.sql"),
    ),
];

/// Pool size used by `serve`. Each in-flight reservation holds one connection
/// for the length of its transaction.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with the default pool size.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Manually parses the URL to preserve the full username; sqlx's built-in
    /// parser strips the ".project-ref" suffix that hosted poolers require.
    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!("migration {} failed: {}", name, e))?;
            tracing::debug!(migration = name, "migration applied");
        }
        Ok(())
    }

    /// Upsert problem statements by `ord` in one transaction.
    ///
    /// Capacity is only ever raised, never lowered, and `submission_count` is
    /// left untouched so re-seeding mid-event is safe.
    pub async fn seed_problems(&self, seeds: &[ProblemSeed]) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO problem_statements (ord, title, objective, is_active, max_submissions)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (ord) DO UPDATE SET
                   title = EXCLUDED.title,
                   objective = EXCLUDED.objective,
                   is_active = EXCLUDED.is_active,
                   max_submissions = GREATEST(problem_statements.max_submissions, EXCLUDED.max_submissions)
                 RETURNING id",
            )
            .bind(seed.order)
            .bind(&seed.title)
            .bind(&seed.objective)
            .bind(seed.active)
            .bind(seed.max_submissions)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(ids)
    }
}
