//! # Planner — Committed Load versus Capacity
//!
//! Pure computation over the loads read inside the allocation transaction:
//!
//! ```text
//! total_committed = submission_count + live_reservations
//! has_capacity    = total_committed < max_submissions
//! needs_expansion = no active problem has capacity
//!                   && some active problem has max_submissions < ceiling
//! ```
//!
//! Expansion itself (raising every active problem to the ceiling in one
//! statement) is carried out by the coordinator, which then re-plans from a
//! fresh read. Raising everything at once keeps the post-expansion field level,
//! so rotation rather than scan order decides who gets the new slots.

use crate::store::{ProblemLoad, ProblemStatement};
use serde::Serialize;

/// One active problem with its load figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(flatten)]
    pub problem: ProblemStatement,
    pub live_reservations: i64,
    pub total_committed: i64,
    pub has_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPlan {
    /// Every active problem, in `order`.
    pub candidates: Vec<Candidate>,
    pub needs_expansion: bool,
}

impl CapacityPlan {
    pub fn any_capacity(&self) -> bool {
        self.candidates.iter().any(|c| c.has_capacity)
    }

    /// Problems that can take one more hold.
    pub fn open(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.has_capacity)
    }

    /// Open problems sharing the lowest committed load, in `order`.
    pub fn least_loaded(&self) -> Vec<&Candidate> {
        let Some(min_load) = self.open().map(|c| c.total_committed).min() else {
            return Vec::new();
        };
        let mut tied: Vec<&Candidate> = self
            .open()
            .filter(|c| c.total_committed == min_load)
            .collect();
        tied.sort_by_key(|c| c.problem.order);
        tied
    }
}

/// Build the capacity plan for the given active problems.
///
/// Inactive rows are ignored even if the caller passes them in.
pub fn plan(loads: &[ProblemLoad], expansion_ceiling: i32) -> CapacityPlan {
    let mut candidates: Vec<Candidate> = loads
        .iter()
        .filter(|l| l.problem.is_active)
        .map(|l| {
            let total_committed = l.total_committed();
            Candidate {
                problem: l.problem.clone(),
                live_reservations: l.live_reservations,
                total_committed,
                has_capacity: total_committed < i64::from(l.problem.max_submissions),
            }
        })
        .collect();
    candidates.sort_by_key(|c| c.problem.order);

    let any_capacity = candidates.iter().any(|c| c.has_capacity);
    let below_ceiling = candidates
        .iter()
        .any(|c| c.problem.max_submissions < expansion_ceiling);

    CapacityPlan {
        needs_expansion: !any_capacity && below_ceiling,
        candidates,
    }
}
