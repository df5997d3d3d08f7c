//! # Health & Observability Endpoints
//!
//! | Endpoint | Purpose | K8s Probe |
//! |----------|---------|-----------|
//! | `GET /healthz` | Liveness, process is alive | `livenessProbe` |
//! | `GET /readyz` | Readiness, reservation store reachable | `readinessProbe` |
//! | `GET /metrics` | Prometheus scraping endpoint | `ServiceMonitor` |
//!
//! The readiness probe runs the store's health check with a 2-second timeout and
//! answers 503 while the store is unreachable.

use super::AppState;
use crate::cursor::CounterStore;
use crate::store::ReservationStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

pub(super) async fn handler_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn handler_readyz<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    let check = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.coordinator.store().health_check(),
    )
    .await;

    match check {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(_)) => (StatusCode::SERVICE_UNAVAILABLE, "store unreachable"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "store timeout"),
    }
}

/// Load gauges are refreshed by the server's background loop, not per scrape.
pub(super) async fn handler_metrics<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    let body = state.prom_metrics.encode();
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
}
