//! # Selector — Round-Robin Tiebreak Among Least-Loaded Problems
//!
//! When several open problems share the minimum committed load, consecutive
//! sessions should fan out across them (1, 2, 3, …, N, 1, 2, …) instead of all
//! landing on the lowest `order`. The selector keeps the `order` of the last
//! pick in a shared [`CounterStore`] and chooses the first tied problem whose
//! `order` is strictly greater, wrapping to the smallest when none is.
//!
//! ## Degradation
//!
//! The cursor is advisory. If the counter store errors or exceeds its timeout,
//! the cursor reads as absent (0), which picks the smallest tied `order`.
//! Writes that fail are logged and dropped. No cursor failure ever reaches the
//! caller.
//!
//! ## When the cursor moves
//!
//! [`RotatingTiebreakSelector::select`] only reads. The coordinator calls
//! [`RotatingTiebreakSelector::remember`] after its transaction commits, so an
//! attempt that is aborted and retried does not advance rotation twice.

use crate::config::AllocationPolicy;
use crate::cursor::CounterStore;
use crate::planner::{Candidate, CapacityPlan};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The chosen problem and how the choice was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub candidate: Candidate,
    /// Number of open problems tied at the minimum load.
    pub tied: usize,
    /// Cursor value consulted, when a tie had to be broken.
    pub cursor: Option<i32>,
}

pub struct RotatingTiebreakSelector<C> {
    counter: Arc<C>,
    key: String,
    ttl: Duration,
    timeout: Duration,
}

impl<C> Clone for RotatingTiebreakSelector<C> {
    fn clone(&self) -> Self {
        RotatingTiebreakSelector {
            counter: Arc::clone(&self.counter),
            key: self.key.clone(),
            ttl: self.ttl,
            timeout: self.timeout,
        }
    }
}

impl<C: CounterStore> RotatingTiebreakSelector<C> {
    pub fn new(counter: Arc<C>, policy: &AllocationPolicy) -> Self {
        RotatingTiebreakSelector {
            counter,
            key: policy.cursor_key.clone(),
            ttl: policy.cursor_ttl,
            timeout: policy.cursor_timeout,
        }
    }

    /// Pick the next problem from the least-loaded open candidates.
    ///
    /// Returns `None` when no candidate has capacity.
    pub async fn select(&self, plan: &CapacityPlan) -> Option<Selection> {
        let tied = plan.least_loaded();
        match tied.len() {
            0 => None,
            1 => Some(Selection {
                candidate: tied[0].clone(),
                tied: 1,
                cursor: None,
            }),
            n => {
                let cursor = self.last_order().await.unwrap_or(0);
                let orders: Vec<i32> = tied.iter().map(|c| c.problem.order).collect();
                let idx = next_in_rotation(&orders, cursor)?;
                debug!(cursor, tied = n, picked = orders[idx], "tiebreak rotation");
                Some(Selection {
                    candidate: tied[idx].clone(),
                    tied: n,
                    cursor: Some(cursor),
                })
            }
        }
    }

    /// Persist `order` as the latest assignment. Best-effort.
    pub async fn remember(&self, order: i32) {
        let write = self.counter.set(&self.key, i64::from(order), self.ttl);
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, order, "rotation cursor write failed"),
            Err(_) => warn!(order, "rotation cursor write timed out"),
        }
    }

    /// Cursor value, or `None` when absent, expired, unreadable or out of range.
    pub async fn last_order(&self) -> Option<i32> {
        match tokio::time::timeout(self.timeout, self.counter.get(&self.key)).await {
            Ok(Ok(value)) => value.and_then(|v| i32::try_from(v).ok()),
            Ok(Err(e)) => {
                warn!(error = %e, "rotation cursor unavailable, falling back to lowest order");
                None
            }
            Err(_) => {
                warn!("rotation cursor read timed out, falling back to lowest order");
                None
            }
        }
    }
}

/// Index of the next problem in rotation after `cursor`.
///
/// `tied_orders` must be sorted ascending. Returns the first entry strictly
/// greater than `cursor`, or the first entry when the cursor is at or past the
/// end. `None` only for an empty slice.
pub fn next_in_rotation(tied_orders: &[i32], cursor: i32) -> Option<usize> {
    if tied_orders.is_empty() {
        return None;
    }
    Some(
        tied_orders
            .iter()
            .position(|&order| order > cursor)
            .unwrap_or(0),
    )
}
