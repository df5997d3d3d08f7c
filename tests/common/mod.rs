//! Shared test helpers for integration tests.

#![allow(dead_code)]

use hackportal::config::{AllocationPolicy, ProblemSeed};
use hackportal::cursor::MemoryCounter;
use hackportal::server::{build_router, AppState};
use hackportal::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect to the test database, apply migrations and empty both tables.
pub async fn setup_test_db() -> hackportal::db::Database {
    let db = hackportal::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to apply migrations");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE problem_reservations, problem_statements RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .expect("Failed to truncate tables");
}

pub fn problem(order: i32, max_submissions: i32) -> ProblemSeed {
    ProblemSeed {
        order,
        title: format!("Problem {}", order),
        objective: format!("Objective for problem {}", order),
        max_submissions,
        active: true,
    }
}

/// Policy with short retry pauses so contention tests finish quickly.
pub fn test_policy() -> AllocationPolicy {
    AllocationPolicy {
        retry_backoff: Duration::from_millis(5),
        max_tx_attempts: 20,
        ..Default::default()
    }
}

pub type MemoryState = Arc<AppState<MemoryStore, MemoryCounter>>;

/// Build an Axum router over a fresh in-memory store seeded with `seeds`.
pub async fn build_memory_app(seeds: &[ProblemSeed]) -> (axum::Router, MemoryStore, MemoryState) {
    let store = MemoryStore::new();
    store.seed(seeds).await;
    let state = AppState::with_policy(
        store.clone(),
        Arc::new(MemoryCounter::new()),
        AllocationPolicy::default(),
    );
    (build_router(state.clone()), store, state)
}
