//! # Prometheus Metrics — Exposition for Container Orchestration
//!
//! Exposes reservation-engine metrics in the Prometheus text exposition format.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hackportal_reservations_total` | Counter | `outcome` | Reserve calls by result |
//! | `hackportal_capacity_expansions_total` | Counter | — | Step expansions to the ceiling |
//! | `hackportal_transaction_conflicts_total` | Counter | — | Serialization aborts that were retried or exhausted |
//! | `hackportal_reservations_reaped_total` | Counter | — | Expired holds deleted |
//! | `hackportal_finalized_total` | Counter | — | Holds converted into submissions |
//! | `hackportal_problem_committed_load` | Gauge | `order` | Submissions + live holds per problem |
//! | `hackportal_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//!
//! Load gauges are refreshed by the server's background loop; the counters are
//! incremented inline by the coordinator and reaper.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for reservation outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

/// Label set for per-problem gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct ProblemLabel {
    pub order: String,
}

/// Label set for HTTP request duration histogram.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Thread-safe metrics registry. All handles are atomics and cheap to clone.
pub struct Metrics {
    pub registry: Registry,
    pub reservations: Family<OutcomeLabel, Counter>,
    pub capacity_expansions: Counter,
    pub transaction_conflicts: Counter,
    pub reservations_reaped: Counter,
    pub finalized: Counter,
    pub committed_load: Family<ProblemLabel, Gauge>,
    pub http_request_duration: Family<HttpLabel, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reservations = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "hackportal_reservations",
            "Reserve calls by outcome",
            reservations.clone(),
        );

        let capacity_expansions = Counter::default();
        registry.register(
            "hackportal_capacity_expansions",
            "Times every active problem was raised to the expansion ceiling",
            capacity_expansions.clone(),
        );

        let transaction_conflicts = Counter::default();
        registry.register(
            "hackportal_transaction_conflicts",
            "Serializable transactions aborted by the store",
            transaction_conflicts.clone(),
        );

        let reservations_reaped = Counter::default();
        registry.register(
            "hackportal_reservations_reaped",
            "Expired reservations deleted by the reaper",
            reservations_reaped.clone(),
        );

        let finalized = Counter::default();
        registry.register(
            "hackportal_finalized",
            "Reservations converted into confirmed submissions",
            finalized.clone(),
        );

        let committed_load = Family::<ProblemLabel, Gauge>::default();
        registry.register(
            "hackportal_problem_committed_load",
            "Confirmed submissions plus live reservations per problem statement",
            committed_load.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "hackportal_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration.clone(),
        );

        Metrics {
            registry,
            reservations,
            capacity_expansions,
            transaction_conflicts,
            reservations_reaped,
            finalized,
            committed_load,
            http_request_duration,
        }
    }

    /// Count one reserve call by its outcome label.
    pub fn record_outcome(&self, outcome: &str) {
        self.reservations
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn set_committed_load(&self, order: i32, load: i64) {
        self.committed_load
            .get_or_create(&ProblemLabel {
                order: order.to_string(),
            })
            .set(load);
    }

    /// Encode all metrics in OpenMetrics text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap_or_default();
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
