//! Allocation scenarios against the in-memory store and counter.

use super::*;
use crate::config::ProblemSeed;
use crate::cursor::MemoryCounter;
use crate::events::EventBus;
use crate::store::MemoryStore;
use chrono::Duration as ChronoDuration;
use std::time::Duration;

type Coordinator = ReservationCoordinator<MemoryStore, MemoryCounter>;

const EXPANDED_CEILING: i32 = crate::config::EXPANDED_CAPACITY;

fn seed(order: i32, cap: i32) -> ProblemSeed {
    ProblemSeed {
        order,
        title: format!("P{}", order),
        objective: format!("Objective {}", order),
        max_submissions: cap,
        active: true,
    }
}

fn fast_policy() -> AllocationPolicy {
    AllocationPolicy {
        retry_backoff: Duration::from_millis(1),
        cursor_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

struct Harness {
    store: MemoryStore,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    coordinator: Coordinator,
}

async fn harness(seeds: &[ProblemSeed]) -> Harness {
    harness_with(seeds, fast_policy()).await
}

async fn harness_with(seeds: &[ProblemSeed], policy: AllocationPolicy) -> Harness {
    let store = MemoryStore::new();
    store.seed(seeds).await;
    let bus = Arc::new(EventBus::new());
    let metrics = Arc::new(Metrics::new());
    let coordinator = ReservationCoordinator::new(
        store.clone(),
        Arc::new(MemoryCounter::new()),
        bus.clone(),
        Arc::clone(&metrics),
        policy,
    );
    Harness {
        store,
        bus,
        metrics,
        coordinator,
    }
}

fn assigned_order(outcome: &ReserveOutcome) -> i32 {
    match outcome {
        ReserveOutcome::Assigned(a) => a.problem.order,
        other => panic!("expected a new assignment, got {:?}", other),
    }
}

fn outcome_count(metrics: &Metrics, outcome: &str) -> u64 {
    metrics
        .reservations
        .get_or_create(&crate::prom_metrics::OutcomeLabel {
            outcome: outcome.into(),
        })
        .get()
}

#[tokio::test]
async fn sessions_fan_out_then_expand_when_full() {
    let h = harness(&[seed(1, 2), seed(2, 2), seed(3, 2)]).await;
    let now = Utc::now();

    let mut picked = Vec::new();
    for session in ["A", "B", "C", "D", "E", "F"] {
        let outcome = h.coordinator.reserve(session, now).await.unwrap();
        picked.push(assigned_order(&outcome));
    }
    assert_eq!(picked, vec![1, 2, 3, 1, 2, 3]);
    assert!(h
        .store
        .problems()
        .await
        .iter()
        .all(|p| p.max_submissions == 2));

    let g = h.coordinator.reserve("G", now).await.unwrap();
    assert_eq!(assigned_order(&g), 1);
    assert!(h
        .store
        .problems()
        .await
        .iter()
        .all(|p| p.max_submissions == EXPANDED_CEILING));
    assert_eq!(h.metrics.capacity_expansions.get(), 1);

    let kinds: Vec<EventKind> = h.bus.recent().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Assigned).count(), 7);
    assert!(kinds.contains(&EventKind::CapacityExpanded));
}

#[tokio::test]
async fn ties_rotate_round_robin_and_wrap() {
    let seeds: Vec<ProblemSeed> = (1..=5).map(|o| seed(o, 10)).collect();
    let h = harness(&seeds).await;
    let now = Utc::now();
    let mut picked = Vec::new();
    for i in 0..12 {
        let outcome = h
            .coordinator
            .reserve(&format!("team-{}", i), now)
            .await
            .unwrap();
        picked.push(assigned_order(&outcome));
    }
    assert_eq!(picked, vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5, 1, 2]);
}

#[tokio::test]
async fn new_assignment_reports_hold_and_extensions() {
    let h = harness(&[seed(1, 5)]).await;
    let now = Utc::now();
    let outcome = h.coordinator.reserve("solo", now).await.unwrap();
    let a = outcome.assignment().unwrap();
    assert_eq!(a.expires_at, now + ChronoDuration::minutes(15));
    assert_eq!(a.extension_count, 0);
    assert_eq!(a.extensions_remaining, 3);
    assert_eq!(a.problem.objective, "Objective 1");
    assert!(a.problem.is_current);
}

#[tokio::test]
async fn extensions_are_bounded() {
    let h = harness(&[seed(1, 5), seed(2, 5)]).await;
    let start = Utc::now();
    let first = h.coordinator.reserve("team", start).await.unwrap();
    let order = assigned_order(&first);

    for n in 1..=3 {
        let now = start + ChronoDuration::minutes(5 * n as i64);
        match h.coordinator.reserve("team", now).await.unwrap() {
            ReserveOutcome::Extended(a) => {
                assert_eq!(a.problem.order, order);
                assert_eq!(a.extension_count, n);
                assert_eq!(a.extensions_remaining, 3 - n);
                assert_eq!(a.expires_at, now + ChronoDuration::minutes(15));
            }
            other => panic!("expected extension {}, got {:?}", n, other),
        }
    }
    let before = h.store.reservations().await;

    let later = start + ChronoDuration::minutes(20);
    let err = h.coordinator.reserve("team", later).await.unwrap_err();
    assert!(matches!(err, ReserveError::ExtensionLimitReached));
    assert_eq!(h.store.reservations().await, before);
    assert_eq!(outcome_count(&h.metrics, "limit_reached"), 1);
    assert_eq!(outcome_count(&h.metrics, "extended"), 3);
}

#[tokio::test]
async fn each_session_holds_at_most_one_reservation() {
    let h = harness(&[seed(1, 5), seed(2, 5)]).await;
    let now = Utc::now();
    h.coordinator.reserve("dup", now).await.unwrap();
    h.coordinator.reserve("dup", now).await.unwrap();
    h.coordinator.reserve("other", now).await.unwrap();
    let rows = h.store.reservations().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|r| r.session_id == "dup").count(), 1);
}

#[tokio::test]
async fn expired_holds_free_their_slot() {
    let h = harness(&[seed(1, EXPANDED_CEILING)]).await;
    h.store.set_submission_count(1, EXPANDED_CEILING - 1).await;
    let start = Utc::now();
    assert!(h.coordinator.reserve("early", start).await.unwrap().assignment().is_some());
    assert_eq!(
        h.coordinator.reserve("late", start).await.unwrap(),
        ReserveOutcome::AllFilled
    );

    let after_expiry = start + ChronoDuration::minutes(16);
    let outcome = h.coordinator.reserve("late", after_expiry).await.unwrap();
    assert_eq!(assigned_order(&outcome), 1);
    let rows = h.store.reservations().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session_id, "late");
}

#[tokio::test]
async fn expired_hold_of_same_session_is_replaced() {
    let h = harness(&[seed(1, 5)]).await;
    let start = Utc::now();
    h.store
        .put_reservation(Reservation {
            session_id: "back".into(),
            problem_statement_id: 1,
            expires_at: start - ChronoDuration::seconds(1),
            extension_count: 3,
            created_at: start - ChronoDuration::minutes(16),
        })
        .await;
    // skip the reaper: the transaction itself must clear the stale row
    match h.coordinator.try_reserve("back", start).await {
        Ok(Decision::Assigned { assignment, .. }) => assert_eq!(assignment.extension_count, 0),
        _ => panic!("expected a fresh assignment"),
    }
    let rows = h.store.reservations().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].extension_count, 0);
    assert_eq!(rows[0].expires_at, start + ChronoDuration::minutes(15));
}

#[tokio::test]
async fn expansion_happens_once_then_all_filled() {
    let h = harness(&[seed(1, 1), seed(2, 1)]).await;
    let now = Utc::now();
    for i in 0..2 {
        h.coordinator.reserve(&format!("s{}", i), now).await.unwrap();
    }
    for i in 2..(2 * EXPANDED_CEILING) {
        let outcome = h.coordinator.reserve(&format!("s{}", i), now).await.unwrap();
        assert!(outcome.assignment().is_some(), "session s{} not assigned", i);
    }
    assert_eq!(h.metrics.capacity_expansions.get(), 1);

    let outcome = h.coordinator.reserve("overflow", now).await.unwrap();
    assert_eq!(outcome, ReserveOutcome::AllFilled);
    assert_eq!(h.metrics.capacity_expansions.get(), 1);
    assert_eq!(outcome_count(&h.metrics, "all_filled"), 1);
    assert!(h
        .store
        .problems()
        .await
        .iter()
        .all(|p| p.max_submissions == EXPANDED_CEILING));
}

#[tokio::test]
async fn inactive_problems_are_never_assigned() {
    let mut hidden = seed(2, 5);
    hidden.active = false;
    let h = harness(&[seed(1, EXPANDED_CEILING), hidden]).await;
    let now = Utc::now();
    for i in 0..5 {
        let outcome = h.coordinator.reserve(&format!("t{}", i), now).await.unwrap();
        assert_eq!(assigned_order(&outcome), 1);
    }
}

#[tokio::test]
async fn no_active_problems_reports_all_filled() {
    let h = harness(&[]).await;
    let outcome = h.coordinator.reserve("lonely", Utc::now()).await.unwrap();
    assert_eq!(outcome, ReserveOutcome::AllFilled);
    assert_eq!(h.metrics.capacity_expansions.get(), 0);
}

#[tokio::test]
async fn conflicts_are_retried_until_commit() {
    let h = harness(&[seed(1, 5), seed(2, 5), seed(3, 5)]).await;
    h.store.inject_conflicts(2);
    let outcome = h.coordinator.reserve("busy", Utc::now()).await.unwrap();
    assert_eq!(assigned_order(&outcome), 1);
    assert_eq!(h.metrics.transaction_conflicts.get(), 2);
    assert_eq!(h.store.reservations().await.len(), 1);

    let next = h.coordinator.reserve("next", Utc::now()).await.unwrap();
    assert_eq!(assigned_order(&next), 2);
}

#[tokio::test]
async fn persistent_conflicts_surface_after_max_attempts() {
    let h = harness(&[seed(1, 5)]).await;
    h.store.inject_conflicts(10);
    let err = h.coordinator.reserve("unlucky", Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReserveError::TransactionConflict { attempts: 5 }));
    assert!(err.is_transient());
    assert_eq!(h.metrics.transaction_conflicts.get(), 5);
    assert!(h.store.reservations().await.is_empty());
    assert_eq!(outcome_count(&h.metrics, "failed"), 1);
    h.store.inject_conflicts(0);
}

#[tokio::test]
async fn store_outage_is_reported_as_internal() {
    let h = harness(&[seed(1, 5)]).await;
    h.store.set_available(false);
    let err = h.coordinator.reserve("x", Utc::now()).await.unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
    assert!(matches!(err, ReserveError::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn attempt_deadline_yields_timeout() {
    let policy = AllocationPolicy {
        tx_deadline: Duration::from_millis(100),
        ..fast_policy()
    };
    let h = harness_with(&[seed(1, 5)], policy).await;
    let held = h.store.begin().await.unwrap();
    let err = h.coordinator.reserve("waiting", Utc::now()).await.unwrap_err();
    assert!(matches!(err, ReserveError::Timeout));
    drop(held);
    assert!(h.coordinator.reserve("waiting", Utc::now()).await.is_ok());
}

struct FailingSink;

impl AnalyticsSink for FailingSink {
    fn publish(&self, _event: AllocationEvent) -> anyhow::Result<()> {
        anyhow::bail!("analytics endpoint down")
    }
}

#[tokio::test]
async fn analytics_failure_does_not_fail_reservation() {
    let store = MemoryStore::new();
    store.seed(&[seed(1, 5)]).await;
    let coordinator = ReservationCoordinator::new(
        store.clone(),
        Arc::new(MemoryCounter::new()),
        Arc::new(FailingSink),
        Arc::new(Metrics::new()),
        fast_policy(),
    );
    let outcome = coordinator.reserve("team", Utc::now()).await.unwrap();
    assert_eq!(assigned_order(&outcome), 1);
    assert_eq!(store.reservations().await.len(), 1);
}

struct BrokenCounter;

impl CounterStore for BrokenCounter {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<i64>> {
        anyhow::bail!("redis down")
    }
    async fn set(&self, _key: &str, _value: i64, _ttl: Duration) -> anyhow::Result<()> {
        anyhow::bail!("redis down")
    }
}

#[tokio::test]
async fn cursor_outage_degrades_to_lowest_order() {
    let store = MemoryStore::new();
    store.seed(&[seed(1, 5), seed(2, 5), seed(3, 5)]).await;
    let coordinator = ReservationCoordinator::new(
        store.clone(),
        Arc::new(BrokenCounter),
        Arc::new(EventBus::new()),
        Arc::new(Metrics::new()),
        fast_policy(),
    );
    let now = Utc::now();
    let a = coordinator.reserve("a", now).await.unwrap();
    let b = coordinator.reserve("b", now).await.unwrap();
    let c = coordinator.reserve("c", now).await.unwrap();
    // unique minimum still spreads load even without the cursor
    assert_eq!(
        vec![assigned_order(&a), assigned_order(&b), assigned_order(&c)],
        vec![1, 2, 3]
    );
    let d = coordinator.reserve("d", now).await.unwrap();
    assert_eq!(assigned_order(&d), 1);
}

#[tokio::test]
async fn current_pointer_follows_latest_assignment() {
    let h = harness(&[seed(1, 5), seed(2, 5), seed(3, 5)]).await;
    let now = Utc::now();
    for (session, expected) in [("a", 1), ("b", 2)] {
        h.coordinator.reserve(session, now).await.unwrap();
        let current: Vec<i32> = h
            .store
            .problems()
            .await
            .iter()
            .filter(|p| p.is_current)
            .map(|p| p.order)
            .collect();
        assert_eq!(current, vec![expected]);
    }
}

#[tokio::test]
async fn concurrent_sessions_never_exceed_capacity() {
    let h = harness(&[seed(1, EXPANDED_CEILING), seed(2, EXPANDED_CEILING)]).await;
    h.store.set_submission_count(1, EXPANDED_CEILING - 2).await;
    h.store.set_submission_count(2, EXPANDED_CEILING - 2).await;
    let coordinator = Arc::new(h.coordinator);
    let now = Utc::now();

    let mut handles = Vec::new();
    for i in 0..16 {
        let c = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            c.reserve(&format!("racer-{}", i), now).await
        }));
    }
    let mut assigned = 0;
    let mut filled = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ReserveOutcome::Assigned(_) => assigned += 1,
            ReserveOutcome::AllFilled => filled += 1,
            ReserveOutcome::Extended(_) => panic!("fresh sessions cannot extend"),
        }
    }
    assert_eq!(assigned, 4);
    assert_eq!(filled, 12);

    let mut tx = h.store.begin().await.unwrap();
    for load in tx.active_problem_loads(now).await.unwrap() {
        assert!(load.total_committed() <= i64::from(load.problem.max_submissions));
    }
}

#[tokio::test]
async fn finalize_converts_hold_into_submission() {
    let h = harness(&[seed(1, 5)]).await;
    let now = Utc::now();
    h.coordinator.reserve("team", now).await.unwrap();
    let problem = h.coordinator.finalize("team", now).await.unwrap();
    assert_eq!(problem.order, 1);
    assert_eq!(problem.submission_count, 1);
    assert!(h.store.reservations().await.is_empty());
    assert_eq!(h.metrics.finalized.get(), 1);
    assert_eq!(h.bus.recent().last().unwrap().kind, EventKind::Finalized);

    let err = h.coordinator.finalize("team", now).await.unwrap_err();
    assert!(matches!(err, ReserveError::NoActiveReservation));
}

#[tokio::test]
async fn finalize_rejects_expired_hold() {
    let h = harness(&[seed(1, 5)]).await;
    let start = Utc::now();
    h.coordinator.reserve("slow", start).await.unwrap();
    let err = h
        .coordinator
        .finalize("slow", start + ChronoDuration::minutes(16))
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    assert_eq!(h.store.problems().await[0].submission_count, 0);
}

#[tokio::test]
async fn blank_or_oversized_session_ids_are_rejected() {
    let h = harness(&[seed(1, 5)]).await;
    let now = Utc::now();
    for bad in [String::new(), "   ".to_string(), "x".repeat(MAX_SESSION_ID_LEN + 1)] {
        let err = h.coordinator.reserve(&bad, now).await.unwrap_err();
        assert!(matches!(err, ReserveError::InvalidSession(_)));
    }
    assert!(h.store.reservations().await.is_empty());
    assert_eq!(h.store.commit_count(), 0);
}
