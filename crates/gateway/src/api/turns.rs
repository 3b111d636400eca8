//! Turn control endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use uuid::Uuid;

use crate::engine::CancelOutcome;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/turns/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flip the turn's cancel token. The turn notices at its next suspension
/// point; the packet stream ends without a `stop`.
pub async fn cancel_turn(State(state): State<AppState>, Path(turn_id): Path<Uuid>) -> Response {
    let (status, body) = match state.turns.cancel(&turn_id) {
        CancelOutcome::Requested => (
            StatusCode::OK,
            json!({ "turn_id": turn_id, "cancelled": true }),
        ),
        CancelOutcome::AlreadyFinished(terminal) => (
            StatusCode::CONFLICT,
            json!({ "error": "turn already finished", "state": terminal }),
        ),
        CancelOutcome::Unknown => {
            (StatusCode::NOT_FOUND, json!({ "error": "unknown turn" }))
        }
    };
    (status, Json(body)).into_response()
}
