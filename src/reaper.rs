//! # Reaper — Expired Hold Cleanup
//!
//! Deletes every reservation whose `expires_at` is in the past so its slot can
//! be assigned again. Runs opportunistically at the start of every `reserve`
//! call and periodically from the server's background loop.
//!
//! Reaping is idempotent and may race with itself; a row already deleted is a
//! no-op. A failed sweep is non-fatal: allocation only counts reservations live
//! at `now`, so stale rows left behind make the planner see no extra load and
//! can never cause over-commitment.

use crate::prom_metrics::Metrics;
use crate::store::ReservationStore;
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ExpiryReaper<S> {
    store: S,
    metrics: Arc<Metrics>,
}

impl<S: Clone> Clone for ExpiryReaper<S> {
    fn clone(&self) -> Self {
        ExpiryReaper {
            store: self.store.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: ReservationStore> ExpiryReaper<S> {
    pub fn new(store: S, metrics: Arc<Metrics>) -> Self {
        ExpiryReaper { store, metrics }
    }

    /// Delete every reservation with `expires_at < now`. Returns the count deleted.
    pub async fn reap(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let deleted = self.store.delete_expired(now).await?;
        if deleted > 0 {
            self.metrics.reservations_reaped.inc_by(deleted);
            debug!(deleted, "reaped expired reservations");
        }
        Ok(deleted)
    }

    /// Like [`reap`](Self::reap), but failures are logged and reported as zero.
    pub async fn reap_best_effort(&self, now: DateTime<Utc>) -> u64 {
        match self.reap(now).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "expiry reaper failed, continuing with stale holds");
                0
            }
        }
    }

    /// Sweep on a fixed interval until the task is dropped.
    pub async fn run_periodic(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let deleted = self.reap_best_effort(Utc::now()).await;
            if deleted > 0 {
                info!(deleted, "periodic reap");
            }
        }
    }
}
