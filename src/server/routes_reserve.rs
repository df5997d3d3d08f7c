//! Reservation API consumed by the registration client.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::coordinator::ReserveOutcome;
use crate::cursor::CounterStore;
use crate::error::ReserveError;
use crate::store::ReservationStore;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SessionPayload {
    session_id: String,
}

fn error_response(err: &ReserveError) -> Response {
    if matches!(err, ReserveError::Store(_)) {
        tracing::error!(error = %err, "reservation store failure");
    }
    (
        err.status(),
        Json(serde_json::json!({
            "success": false,
            "code": err.code(),
            "error": err.public_message(),
        })),
    )
        .into_response()
}

pub(super) async fn handler_reserve_problem<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(payload): Json<SessionPayload>,
) -> Response {
    let outcome = match state
        .coordinator
        .reserve(&payload.session_id, Utc::now())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&e),
    };
    let data = outcome.assignment().map(|a| {
        serde_json::json!({
            "id": a.problem.id,
            "title": a.problem.title,
            "objective": a.problem.objective,
            "extensionsRemaining": a.extensions_remaining,
        })
    });
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "allFilled": matches!(outcome, ReserveOutcome::AllFilled),
        "extended": matches!(outcome, ReserveOutcome::Extended(_)),
    }))
    .into_response()
}

pub(super) async fn handler_finalize_registration<S: ReservationStore, C: CounterStore>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(payload): Json<SessionPayload>,
) -> Response {
    match state
        .coordinator
        .finalize(&payload.session_id, Utc::now())
        .await
    {
        Ok(problem) => Json(serde_json::json!({
            "success": true,
            "data": {
                "id": problem.id,
                "title": problem.title,
                "objective": problem.objective,
            },
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}
