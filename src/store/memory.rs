//! In-process store.
//!
//! Each transaction takes an owned lock on the whole state and works on a
//! private copy, so transactions are trivially serial. Commit swaps the copy
//! in; dropping the transaction discards it. Tests can inject serialization
//! conflicts and outages to exercise the coordinator's retry and error paths.

use super::{ProblemLoad, ProblemStatement, Reservation, ReservationStore, StoreTx};
use crate::config::ProblemSeed;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    problems: BTreeMap<i64, ProblemStatement>,
    reservations: HashMap<String, Reservation>,
    next_id: i64,
}

impl MemoryState {
    fn live_count(&self, problem_id: i64, now: DateTime<Utc>) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.problem_statement_id == problem_id && r.is_live(now))
            .count() as i64
    }
}

struct Shared {
    state: Arc<Mutex<MemoryState>>,
    pending_conflicts: AtomicU32,
    available: AtomicBool,
    commits: AtomicU64,
}

/// Cloneable handle to a shared in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            shared: Arc::new(Shared {
                state: Arc::new(Mutex::new(MemoryState {
                    next_id: 1,
                    ..Default::default()
                })),
                pending_conflicts: AtomicU32::new(0),
                available: AtomicBool::new(true),
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Upsert problems by `order`, with the same rules as the PostgreSQL seeder:
    /// capacity only moves up and confirmed counts are left alone.
    pub async fn seed(&self, seeds: &[ProblemSeed]) -> Vec<i64> {
        let mut state = self.shared.state.lock().await;
        let mut ids = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let existing = state
                .problems
                .values_mut()
                .find(|p| p.order == seed.order);
            if let Some(p) = existing {
                p.title = seed.title.clone();
                p.objective = seed.objective.clone();
                p.is_active = seed.active;
                p.max_submissions = p.max_submissions.max(seed.max_submissions);
                ids.push(p.id);
                continue;
            }
            let id = state.next_id;
            state.next_id += 1;
            state.problems.insert(
                id,
                ProblemStatement {
                    id,
                    order: seed.order,
                    title: seed.title.clone(),
                    objective: seed.objective.clone(),
                    is_active: seed.active,
                    is_current: false,
                    max_submissions: seed.max_submissions,
                    submission_count: 0,
                },
            );
            ids.push(id);
        }
        ids
    }

    /// Overwrite a problem's confirmed submission count (test setup).
    pub async fn set_submission_count(&self, problem_id: i64, count: i32) {
        let mut state = self.shared.state.lock().await;
        if let Some(p) = state.problems.get_mut(&problem_id) {
            p.submission_count = count;
        }
    }

    /// Insert a reservation row directly, bypassing allocation (test setup).
    pub async fn put_reservation(&self, reservation: Reservation) {
        let mut state = self.shared.state.lock().await;
        state
            .reservations
            .insert(reservation.session_id.clone(), reservation);
    }

    pub async fn problems(&self) -> Vec<ProblemStatement> {
        let state = self.shared.state.lock().await;
        let mut problems: Vec<_> = state.problems.values().cloned().collect();
        problems.sort_by_key(|p| p.order);
        problems
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        let state = self.shared.state.lock().await;
        let mut rows: Vec<_> = state.reservations.values().cloned().collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }

    /// Make the next `n` commits fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, n: u32) {
        self.shared.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of transactions committed so far.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl ReservationStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        self.ensure_available()?;
        let guard = Arc::clone(&self.shared.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx {
            guard,
            working,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.ensure_available()?;
        let mut state = self.shared.state.lock().await;
        let before = state.reservations.len();
        state.reservations.retain(|_, r| r.expires_at >= now);
        Ok((before - state.reservations.len()) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_available()
    }
}

/// Transaction over a private copy of the state, holding the global lock.
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    shared: Arc<Shared>,
}

impl StoreTx for MemoryTx {
    async fn find_reservation(&mut self, session_id: &str) -> StoreResult<Option<Reservation>> {
        Ok(self.working.reservations.get(session_id).cloned())
    }

    async fn problem(&mut self, problem_id: i64) -> StoreResult<Option<ProblemStatement>> {
        Ok(self.working.problems.get(&problem_id).cloned())
    }

    async fn active_problem_loads(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<ProblemLoad>> {
        let mut loads: Vec<ProblemLoad> = self
            .working
            .problems
            .values()
            .filter(|p| p.is_active)
            .map(|p| ProblemLoad {
                problem: p.clone(),
                live_reservations: self.working.live_count(p.id, now),
            })
            .collect();
        loads.sort_by_key(|l| l.problem.order);
        Ok(loads)
    }

    async fn raise_capacity(&mut self, ceiling: i32) -> StoreResult<u64> {
        let mut changed = 0;
        for p in self.working.problems.values_mut() {
            if p.is_active && p.max_submissions < ceiling {
                p.max_submissions = ceiling;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_current(&mut self, problem_id: i64) -> StoreResult<()> {
        for p in self.working.problems.values_mut() {
            p.is_current = p.id == problem_id;
        }
        Ok(())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        if !self
            .working
            .problems
            .contains_key(&reservation.problem_statement_id)
        {
            return Err(StoreError::Invalid(format!(
                "problem statement {} does not exist",
                reservation.problem_statement_id
            )));
        }
        if self
            .working
            .reservations
            .contains_key(&reservation.session_id)
        {
            return Err(StoreError::Invalid(format!(
                "session {} already holds a reservation",
                reservation.session_id
            )));
        }
        self.working
            .reservations
            .insert(reservation.session_id.clone(), reservation.clone());
        Ok(())
    }

    async fn update_reservation(
        &mut self,
        session_id: &str,
        expires_at: DateTime<Utc>,
        extension_count: i32,
    ) -> StoreResult<()> {
        match self.working.reservations.get_mut(session_id) {
            Some(r) => {
                r.expires_at = expires_at;
                r.extension_count = extension_count;
                Ok(())
            }
            None => Err(StoreError::Invalid(format!(
                "no reservation for session {}",
                session_id
            ))),
        }
    }

    async fn delete_reservation(&mut self, session_id: &str) -> StoreResult<bool> {
        Ok(self.working.reservations.remove(session_id).is_some())
    }

    async fn record_submission(&mut self, problem_id: i64) -> StoreResult<bool> {
        match self.working.problems.get_mut(&problem_id) {
            Some(p) if p.submission_count < p.max_submissions => {
                p.submission_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self) -> StoreResult<()> {
        let MemoryTx {
            mut guard,
            working,
            shared,
        } = self;
        let injected = shared
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict);
        }
        if !shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        *guard = working;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
