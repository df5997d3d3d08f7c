//! PostgreSQL store integration tests.
//!
//! All tests require TEST_DATABASE_URL to be set.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test pg_store
//!
//! Tests share two tables and must run single-threaded:
//!   cargo test --test pg_store -- --test-threads=1

mod common;

use chrono::{Duration, Utc};
use hackportal::coordinator::{ReservationCoordinator, ReserveOutcome};
use hackportal::cursor::MemoryCounter;
use hackportal::db::Database;
use hackportal::events::EventBus;
use hackportal::prom_metrics::Metrics;
use hackportal::store::{self, Reservation, ReservationStore, StoreTx};
use std::sync::Arc;

/// Skip the test if TEST_DATABASE_URL is not set.
macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn setup() -> Database {
    common::setup_test_db().await
}

fn coordinator(db: &Database) -> Arc<ReservationCoordinator<Database, MemoryCounter>> {
    Arc::new(ReservationCoordinator::new(
        db.clone(),
        Arc::new(MemoryCounter::new()),
        Arc::new(EventBus::new()),
        Arc::new(Metrics::new()),
        common::test_policy(),
    ))
}

#[tokio::test]
async fn migrations_are_idempotent() {
    require_db!();
    let db = setup().await;
    db.migrate().await.unwrap();
    db.migrate().await.unwrap();
    db.health_check().await.unwrap();
}

#[tokio::test]
async fn seeding_upserts_and_never_lowers_capacity() {
    require_db!();
    let db = setup().await;
    let first = db
        .seed_problems(&[common::problem(1, 40), common::problem(2, 30)])
        .await
        .unwrap();
    let mut renamed = common::problem(1, 30);
    renamed.title = "Renamed".into();
    let second = db.seed_problems(&[renamed]).await.unwrap();
    assert_eq!(first[0], second[0]);

    let loads = store::load_snapshot(&db, Utc::now()).await.unwrap();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[0].problem.title, "Renamed");
    assert_eq!(loads[0].problem.max_submissions, 40);
}

#[tokio::test]
async fn loads_count_only_live_reservations() {
    require_db!();
    let db = setup().await;
    let ids = db.seed_problems(&[common::problem(1, 30)]).await.unwrap();
    let now = Utc::now();
    let mut tx = db.begin().await.unwrap();
    for (session, offset) in [("live", 60), ("stale", -60)] {
        tx.insert_reservation(&Reservation {
            session_id: session.into(),
            problem_statement_id: ids[0],
            expires_at: now + Duration::seconds(offset),
            extension_count: 0,
            created_at: now,
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();

    let loads = store::load_snapshot(&db, now).await.unwrap();
    assert_eq!(loads[0].live_reservations, 1);
    assert_eq!(db.delete_expired(now).await.unwrap(), 1);
    assert_eq!(db.delete_expired(now).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_session_violates_uniqueness() {
    require_db!();
    let db = setup().await;
    let ids = db.seed_problems(&[common::problem(1, 30)]).await.unwrap();
    let hold = Reservation {
        session_id: "same".into(),
        problem_statement_id: ids[0],
        expires_at: Utc::now() + Duration::minutes(15),
        extension_count: 0,
        created_at: Utc::now(),
    };
    let mut tx = db.begin().await.unwrap();
    tx.insert_reservation(&hold).await.unwrap();
    let err = tx.insert_reservation(&hold).await.unwrap_err();
    assert!(matches!(err, hackportal::error::StoreError::Invalid(_)));
}

#[tokio::test]
async fn reserve_extend_and_finalize_round_trip() {
    require_db!();
    let db = setup().await;
    db.seed_problems(&[common::problem(1, 30), common::problem(2, 30)])
        .await
        .unwrap();
    let c = coordinator(&db);
    let now = Utc::now();

    let first = c.reserve("team", now).await.unwrap();
    assert!(matches!(first, ReserveOutcome::Assigned(_)));
    let again = c.reserve("team", now + Duration::minutes(1)).await.unwrap();
    assert!(matches!(again, ReserveOutcome::Extended(ref a) if a.extension_count == 1));

    let problem = c.finalize("team", now + Duration::minutes(2)).await.unwrap();
    assert_eq!(problem.submission_count, 1);
    let loads = store::load_snapshot(&db, now).await.unwrap();
    let total: i64 = loads.iter().map(|l| l.total_committed()).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn concurrent_reservations_respect_capacity() {
    require_db!();
    let db = setup().await;
    db.seed_problems(&[common::problem(1, 50), common::problem(2, 50)])
        .await
        .unwrap();
    let c = coordinator(&db);
    let now = Utc::now();

    let mut handles = Vec::new();
    for i in 0..120 {
        let c = Arc::clone(&c);
        handles.push(tokio::spawn(async move {
            c.reserve(&format!("team-{}", i), now).await
        }));
    }
    let mut assigned = 0;
    for handle in handles {
        if let Ok(ReserveOutcome::Assigned(_)) = handle.await.unwrap() {
            assigned += 1;
        }
    }
    assert!(assigned <= 100);

    let loads = store::load_snapshot(&db, now).await.unwrap();
    for load in &loads {
        assert!(load.total_committed() <= i64::from(load.problem.max_submissions));
    }
}

#[tokio::test]
async fn expansion_raises_every_active_problem_once() {
    require_db!();
    let db = setup().await;
    db.seed_problems(&[common::problem(1, 1), common::problem(2, 1)])
        .await
        .unwrap();
    let c = coordinator(&db);
    let now = Utc::now();
    c.reserve("a", now).await.unwrap();
    c.reserve("b", now).await.unwrap();
    let third = c.reserve("c", now).await.unwrap();
    assert!(matches!(third, ReserveOutcome::Assigned(_)));

    let loads = store::load_snapshot(&db, now).await.unwrap();
    assert!(loads.iter().all(|l| l.problem.max_submissions == 50));
    let current: Vec<i32> = loads
        .iter()
        .filter(|l| l.problem.is_current)
        .map(|l| l.problem.order)
        .collect();
    assert_eq!(current.len(), 1);
}
