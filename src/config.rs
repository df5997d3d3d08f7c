//! # Config — Allocation Policy and Problem Seeding
//!
//! The allocation constants are fixed for the event and are deliberately not
//! read from the environment. `AllocationPolicy::default()` is the production
//! policy; tests build narrower policies to exercise edge cases quickly.
//!
//! Problem statements themselves are operator data. They are loaded from a
//! TOML file with one `[[problem]]` table per statement:
//!
//! ```toml
//! [[problem]]
//! order = 1
//! title = "Smart irrigation"
//! objective = "Cut water use on small farms"
//! max_submissions = 30   # optional, defaults to DEFAULT_CAPACITY
//! active = true          # optional
//! ```

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// How long a fresh or extended hold lasts.
pub const HOLD_DURATION: Duration = Duration::from_secs(15 * 60);
/// Extensions allowed after the initial hold.
pub const MAX_EXTENSIONS: i32 = 3;
/// Capacity given to a problem statement when the operator does not set one.
pub const DEFAULT_CAPACITY: i32 = 30;
/// Ceiling every active problem is raised to when all of them are full.
pub const EXPANDED_CAPACITY: i32 = 50;
/// Lifetime of the rotation cursor in the shared counter store.
pub const CURSOR_TTL: Duration = Duration::from_secs(3600);
/// Key holding the `order` of the last tie-broken assignment.
pub const CURSOR_KEY: &str = "problem_rotation:last_order";

/// Knobs consumed by the reaper, planner, selector and coordinator.
#[derive(Debug, Clone)]
pub struct AllocationPolicy {
    pub hold_duration: Duration,
    pub max_extensions: i32,
    pub default_capacity: i32,
    pub expanded_capacity: i32,
    pub cursor_key: String,
    pub cursor_ttl: Duration,
    /// Upper bound on a single cursor get/set round-trip.
    pub cursor_timeout: Duration,
    /// Deadline for one transaction attempt against the store.
    pub tx_deadline: Duration,
    /// Total transaction attempts (first try included) before giving up on conflicts.
    pub max_tx_attempts: u32,
    /// Base pause between conflicting attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        AllocationPolicy {
            hold_duration: HOLD_DURATION,
            max_extensions: MAX_EXTENSIONS,
            default_capacity: DEFAULT_CAPACITY,
            expanded_capacity: EXPANDED_CAPACITY,
            cursor_key: CURSOR_KEY.to_string(),
            cursor_ttl: CURSOR_TTL,
            cursor_timeout: Duration::from_millis(500),
            tx_deadline: Duration::from_secs(10),
            max_tx_attempts: 5,
            retry_backoff: Duration::from_millis(20),
        }
    }
}

impl AllocationPolicy {
    /// Hold length as a chrono duration for timestamp arithmetic.
    pub fn hold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.hold_duration).unwrap_or(chrono::Duration::minutes(15))
    }
}

// ── Seed file ───────────────────────────────────────────────────

/// Top-level seed document: a list of `[[problem]]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default, rename = "problem")]
    pub problems: Vec<ProblemSeed>,
}

/// One problem statement as written by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemSeed {
    pub order: i32,
    pub title: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default = "default_capacity")]
    pub max_submissions: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_capacity() -> i32 {
    DEFAULT_CAPACITY
}

fn default_active() -> bool {
    true
}

/// Parse and validate a seed document.
pub fn parse_seed_toml(input: &str) -> Result<SeedFile> {
    let seed: SeedFile = toml::from_str(input)?;
    validate_seed(&seed)?;
    Ok(seed)
}

/// Reject seeds the store would refuse or that break rotation ordering.
pub fn validate_seed(seed: &SeedFile) -> Result<()> {
    if seed.problems.is_empty() {
        bail!("seed file defines no [[problem]] entries");
    }
    let mut seen = HashSet::new();
    for p in &seed.problems {
        if p.order < 1 {
            bail!("problem '{}': order must be >= 1, got {}", p.title, p.order);
        }
        if !seen.insert(p.order) {
            bail!("duplicate problem order {}", p.order);
        }
        if p.title.trim().is_empty() {
            bail!("problem with order {} has an empty title", p.order);
        }
        if p.max_submissions < 1 {
            bail!(
                "problem '{}': max_submissions must be >= 1, got {}",
                p.title,
                p.max_submissions
            );
        }
    }
    Ok(())
}
