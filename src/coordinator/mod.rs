//! # Coordinator — Reservation Orchestration
//!
//! Turns a session's "give me a problem statement" request into exactly one of:
//! a new hold, an extended hold, a limit-reached refusal, or the all-filled
//! signal.
//!
//! ## Flow
//!
//! ```text
//! reserve(session, now)
//!   ├─ reaper.reap_best_effort(now)            (outside the transaction)
//!   └─ serializable transaction, retried on conflict
//!        ├─ existing live hold?  → extend (≤ max_extensions) or refuse
//!        ├─ existing stale hold? → delete, continue as new
//!        ├─ plan loads → none open & below ceiling? raise all, re-plan
//!        ├─ select least loaded (rotating tiebreak)
//!        ├─ move is_current pointer, insert hold
//!        └─ commit
//!   then (after commit, never failing the call)
//!        ├─ persist rotation cursor
//!        ├─ metrics
//!        └─ analytics event
//! ```
//!
//! ## State machine per reservation
//!
//! `NONE → ACTIVE → ACTIVE (extended, ≤3) → EXPIRED (reaped) | CONSUMED (finalize)`.
//! Only `ACTIVE` holds can be extended or finalized.
//!
//! ## Retries
//!
//! The transaction is the unit of retry. A serialization conflict re-runs the
//! whole read-decide-write sequence from a fresh read, up to
//! `max_tx_attempts`. Each attempt is bounded by `tx_deadline`.

#[cfg(test)]
mod tests;

use crate::config::AllocationPolicy;
use crate::cursor::CounterStore;
use crate::error::{ReserveError, StoreError};
use crate::events::{AllocationEvent, AnalyticsSink, EventKind};
use crate::planner;
use crate::prom_metrics::Metrics;
use crate::reaper::ExpiryReaper;
use crate::selector::RotatingTiebreakSelector;
use crate::store::{ProblemStatement, Reservation, ReservationStore, StoreTx};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest session identifier accepted.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// A hold as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub problem: ProblemStatement,
    pub expires_at: DateTime<Utc>,
    pub extension_count: i32,
    pub extensions_remaining: i32,
}

/// Successful results of [`ReservationCoordinator::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A new hold was created.
    Assigned(Assignment),
    /// The session's existing hold was pushed forward.
    Extended(Assignment),
    /// Every active problem is at capacity, even after expansion.
    AllFilled,
}

impl ReserveOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            ReserveOutcome::Assigned(a) | ReserveOutcome::Extended(a) => Some(a),
            ReserveOutcome::AllFilled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReserveOutcome::Assigned(_) => "assigned",
            ReserveOutcome::Extended(_) => "extended",
            ReserveOutcome::AllFilled => "all_filled",
        }
    }
}

/// What one committed transaction decided, plus facts needed after commit.
enum Decision {
    Extended(Assignment),
    Assigned {
        assignment: Assignment,
        committed_load: i64,
        tied: usize,
        expanded: bool,
    },
    AllFilled {
        expanded: bool,
    },
}

pub struct ReservationCoordinator<S, C> {
    store: S,
    selector: RotatingTiebreakSelector<C>,
    reaper: ExpiryReaper<S>,
    analytics: Arc<dyn AnalyticsSink>,
    metrics: Arc<Metrics>,
    policy: AllocationPolicy,
}

impl<S: ReservationStore, C: CounterStore> ReservationCoordinator<S, C> {
    pub fn new(
        store: S,
        counter: Arc<C>,
        analytics: Arc<dyn AnalyticsSink>,
        metrics: Arc<Metrics>,
        policy: AllocationPolicy,
    ) -> Self {
        ReservationCoordinator {
            selector: RotatingTiebreakSelector::new(counter, &policy),
            reaper: ExpiryReaper::new(store.clone(), Arc::clone(&metrics)),
            store,
            analytics,
            metrics,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reaper(&self) -> &ExpiryReaper<S> {
        &self.reaper
    }

    pub fn selector(&self) -> &RotatingTiebreakSelector<C> {
        &self.selector
    }

    pub fn policy(&self) -> &AllocationPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Assign, extend, refuse, or report all-filled for `session_id`.
    pub async fn reserve(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, ReserveError> {
        validate_session_id(session_id)?;

        // Bounded so a wedged store cannot stall the request before its own deadline.
        if tokio::time::timeout(self.policy.tx_deadline, self.reaper.reap_best_effort(now))
            .await
            .is_err()
        {
            warn!("expiry reaper timed out, continuing with stale holds");
        }

        let decision = self
            .run_in_transaction("reserve", move || self.try_reserve(session_id, now))
            .await;

        let decision = match decision {
            Ok(d) => d,
            Err(e) => {
                let label = match e {
                    ReserveError::ExtensionLimitReached => "limit_reached",
                    _ => "failed",
                };
                self.metrics.record_outcome(label);
                info!(session = session_id, code = e.code(), "reservation refused");
                return Err(e);
            }
        };

        let outcome = match decision {
            Decision::Extended(assignment) => {
                info!(
                    session = session_id,
                    order = assignment.problem.order,
                    extensions_remaining = assignment.extensions_remaining,
                    "reservation extended"
                );
                self.emit(
                    AllocationEvent::new(EventKind::Extended, now)
                        .session(session_id)
                        .problem(
                            assignment.problem.id,
                            assignment.problem.order,
                            assignment.problem.max_submissions,
                        ),
                );
                ReserveOutcome::Extended(assignment)
            }
            Decision::Assigned {
                assignment,
                committed_load,
                tied,
                expanded,
            } => {
                if expanded {
                    self.on_expanded(now);
                }
                self.selector.remember(assignment.problem.order).await;
                info!(
                    session = session_id,
                    order = assignment.problem.order,
                    load = committed_load,
                    capacity = assignment.problem.max_submissions,
                    tied,
                    "problem statement assigned"
                );
                self.emit(
                    AllocationEvent::new(EventKind::Assigned, now)
                        .session(session_id)
                        .problem(
                            assignment.problem.id,
                            assignment.problem.order,
                            assignment.problem.max_submissions,
                        )
                        .load(committed_load)
                        .tied(tied),
                );
                ReserveOutcome::Assigned(assignment)
            }
            Decision::AllFilled { expanded } => {
                if expanded {
                    self.on_expanded(now);
                }
                info!(session = session_id, "all problem statements filled");
                self.emit(AllocationEvent::new(EventKind::AllFilled, now).session(session_id));
                ReserveOutcome::AllFilled
            }
        };
        self.metrics.record_outcome(outcome.label());
        Ok(outcome)
    }

    /// Convert the session's live hold into a confirmed submission.
    ///
    /// Committed load is unchanged: one live reservation becomes one submission.
    pub async fn finalize(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProblemStatement, ReserveError> {
        validate_session_id(session_id)?;
        let problem = self
            .run_in_transaction("finalize", move || self.try_finalize(session_id, now))
            .await?;
        self.metrics.finalized.inc();
        info!(session = session_id, order = problem.order, "registration finalized");
        self.emit(
            AllocationEvent::new(EventKind::Finalized, now)
                .session(session_id)
                .problem(problem.id, problem.order, problem.max_submissions)
                .load(i64::from(problem.submission_count)),
        );
        Ok(problem)
    }

    async fn try_reserve(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, ReserveError> {
        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx.find_reservation(session_id).await? {
            if existing.is_live(now) {
                return self.extend(tx, existing, now).await;
            }
            // reaper has not caught this one yet
            tx.delete_reservation(session_id).await?;
        }

        let ceiling = self.policy.expanded_capacity;
        let mut plan = planner::plan(&tx.active_problem_loads(now).await?, ceiling);
        let mut expanded = false;
        if plan.needs_expansion {
            let raised = tx.raise_capacity(ceiling).await?;
            debug!(raised, ceiling, "capacity expansion");
            expanded = true;
            plan = planner::plan(&tx.active_problem_loads(now).await?, ceiling);
        }

        let Some(selection) = self.selector.select(&plan).await else {
            tx.commit().await?;
            return Ok(Decision::AllFilled { expanded });
        };

        let mut problem = selection.candidate.problem;
        if !problem.is_current {
            tx.mark_current(problem.id).await?;
            problem.is_current = true;
        }
        let reservation = Reservation {
            session_id: session_id.to_string(),
            problem_statement_id: problem.id,
            expires_at: now + self.policy.hold(),
            extension_count: 0,
            created_at: now,
        };
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        Ok(Decision::Assigned {
            assignment: Assignment {
                problem,
                expires_at: reservation.expires_at,
                extension_count: 0,
                extensions_remaining: self.policy.max_extensions,
            },
            committed_load: selection.candidate.total_committed + 1,
            tied: selection.tied,
            expanded,
        })
    }

    async fn extend(
        &self,
        mut tx: S::Tx,
        existing: Reservation,
        now: DateTime<Utc>,
    ) -> Result<Decision, ReserveError> {
        if existing.extension_count >= self.policy.max_extensions {
            // tx dropped: nothing written, expires_at untouched
            return Err(ReserveError::ExtensionLimitReached);
        }
        let extension_count = existing.extension_count + 1;
        let expires_at = now + self.policy.hold();
        tx.update_reservation(&existing.session_id, expires_at, extension_count)
            .await?;
        let problem = tx
            .problem(existing.problem_statement_id)
            .await?
            .ok_or_else(|| {
                StoreError::Invalid(format!(
                    "reservation references missing problem {}",
                    existing.problem_statement_id
                ))
            })?;
        tx.commit().await?;
        Ok(Decision::Extended(Assignment {
            problem,
            expires_at,
            extension_count,
            extensions_remaining: self.policy.max_extensions - extension_count,
        }))
    }

    async fn try_finalize(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProblemStatement, ReserveError> {
        let mut tx = self.store.begin().await?;
        let existing = tx
            .find_reservation(session_id)
            .await?
            .filter(|r| r.is_live(now))
            .ok_or(ReserveError::NoActiveReservation)?;
        if !tx.record_submission(existing.problem_statement_id).await? {
            return Err(StoreError::Invalid(format!(
                "problem {} has no room for another submission",
                existing.problem_statement_id
            ))
            .into());
        }
        tx.delete_reservation(session_id).await?;
        let problem = tx
            .problem(existing.problem_statement_id)
            .await?
            .ok_or_else(|| {
                StoreError::Invalid(format!(
                    "reservation references missing problem {}",
                    existing.problem_statement_id
                ))
            })?;
        tx.commit().await?;
        Ok(problem)
    }

    /// Run `attempt` until it commits, fails for a non-conflict reason, exhausts
    /// its attempts, or exceeds the per-attempt deadline.
    async fn run_in_transaction<T, F, Fut>(
        &self,
        op: &'static str,
        mut attempt: F,
    ) -> Result<T, ReserveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReserveError>>,
    {
        let max_attempts = self.policy.max_tx_attempts.max(1);
        let mut n = 0;
        loop {
            n += 1;
            match tokio::time::timeout(self.policy.tx_deadline, attempt()).await {
                Ok(Err(ReserveError::Store(StoreError::Conflict))) => {
                    self.metrics.transaction_conflicts.inc();
                    if n >= max_attempts {
                        warn!(op, attempts = n, "serialization conflicts exhausted retries");
                        return Err(ReserveError::TransactionConflict { attempts: n });
                    }
                    debug!(op, attempt = n, "serialization conflict, retrying");
                    tokio::time::sleep(self.policy.retry_backoff * n).await;
                }
                Ok(result) => return result,
                Err(_) => {
                    warn!(op, attempt = n, deadline = ?self.policy.tx_deadline, "transaction deadline exceeded");
                    return Err(ReserveError::Timeout);
                }
            }
        }
    }

    fn on_expanded(&self, now: DateTime<Utc>) {
        self.metrics.capacity_expansions.inc();
        info!(
            ceiling = self.policy.expanded_capacity,
            "all problem statements full, capacity expanded"
        );
        self.emit(AllocationEvent::new(EventKind::CapacityExpanded, now));
    }

    fn emit(&self, event: AllocationEvent) {
        if let Err(e) = self.analytics.publish(event) {
            warn!(error = %e, "analytics sink rejected event");
        }
    }
}

fn validate_session_id(session_id: &str) -> Result<(), ReserveError> {
    if session_id.trim().is_empty() {
        return Err(ReserveError::InvalidSession("session id is empty".into()));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ReserveError::InvalidSession(format!(
            "session id longer than {} bytes",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(())
}
