//! Read-only views: load snapshot and recent allocation events.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use super::AppState;
use crate::cursor::CounterStore;
use crate::planner;
use crate::store::{self, ReservationStore};

pub(super) async fn handler_problem_statements<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
) -> Response {
    let ceiling = state.coordinator.policy().expanded_capacity;
    match store::load_snapshot(state.coordinator.store(), Utc::now()).await {
        Ok(loads) => {
            let plan = planner::plan(&loads, ceiling);
            Json(serde_json::json!({
                "problemStatements": plan.candidates,
                "needsExpansion": plan.needs_expansion,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read problem loads");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "failed to read problem statements"})),
            )
                .into_response()
        }
    }
}

pub(super) async fn handler_events<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "events": state.event_bus.recent() }))
}
