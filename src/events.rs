//! # Events — Allocation Analytics Sink
//!
//! Every committed allocation decision is published as an [`AllocationEvent`].
//! Publishing is fire-and-forget: the coordinator hands the event to an
//! [`AnalyticsSink`] after commit, logs any error, and moves on. A failing sink
//! never rolls back or fails a reservation.
//!
//! ## Event Types
//!
//! | Kind | Emitted When |
//! |------|-------------|
//! | `assigned` | A session received a new hold |
//! | `extended` | A session pushed its hold's deadline forward |
//! | `capacity_expanded` | All active problems were raised to the ceiling |
//! | `all_filled` | No problem could take a hold even after expansion |
//! | `finalized` | A hold was converted into a confirmed submission |
//!
//! ## Delivery
//!
//! [`EventBus`] keeps the most recent events in a bounded `VecDeque`, served by
//! `GET /api/events`, and mirrors each one to the `analytics` tracing target so
//! a log shipper can forward them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Assigned,
    Extended,
    CapacityExpanded,
    AllFilled,
    Finalized,
}

/// One analytics record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEvent {
    pub id: u64,
    pub kind: EventKind,
    pub session_id: Option<String>,
    pub problem_id: Option<i64>,
    pub problem_order: Option<i32>,
    /// Committed load of the problem after the decision.
    pub committed_load: Option<i64>,
    pub max_submissions: Option<i32>,
    /// Number of problems tied at minimum load when the pick was made.
    pub tied: Option<usize>,
    pub at: DateTime<Utc>,
}

impl AllocationEvent {
    pub fn new(kind: EventKind, at: DateTime<Utc>) -> Self {
        AllocationEvent {
            id: 0,
            kind,
            session_id: None,
            problem_id: None,
            problem_order: None,
            committed_load: None,
            max_submissions: None,
            tied: None,
            at,
        }
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn problem(mut self, id: i64, order: i32, max_submissions: i32) -> Self {
        self.problem_id = Some(id);
        self.problem_order = Some(order);
        self.max_submissions = Some(max_submissions);
        self
    }

    pub fn load(mut self, committed_load: i64) -> Self {
        self.committed_load = Some(committed_load);
        self
    }

    pub fn tied(mut self, tied: usize) -> Self {
        self.tied = Some(tied);
        self
    }
}

/// Destination for analytics events. Must not block.
pub trait AnalyticsSink: Send + Sync {
    fn publish(&self, event: AllocationEvent) -> anyhow::Result<()>;
}

const RECENT_EVENTS_CAP: usize = 200;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process sink with a bounded log of recent events.
pub struct EventBus {
    recent: Mutex<VecDeque<AllocationEvent>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAP)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Most recent events, oldest first.
    pub fn recent(&self) -> Vec<AllocationEvent> {
        lock(&self.recent).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.recent).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnalyticsSink for EventBus {
    fn publish(&self, mut event: AllocationEvent) -> anyhow::Result<()> {
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "analytics",
            kind = ?event.kind,
            session = event.session_id.as_deref().unwrap_or("-"),
            problem_order = event.problem_order,
            load = event.committed_load,
            "allocation event"
        );
        let mut recent = lock(&self.recent);
        if recent.len() == RECENT_EVENTS_CAP {
            recent.pop_front();
        }
        recent.push_back(event);
        Ok(())
    }
}
