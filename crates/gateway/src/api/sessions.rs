//! Session endpoints: listing and saved-turn retrieval.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// List known sessions, most recently updated first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let entries = state.sessions.list();
    Json(json!({ "count": entries.len(), "sessions": entries }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Saved turn records for one session, oldest first.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(entry) = state.sessions.get(&session_id) else {
        return error_reply(StatusCode::NOT_FOUND, "session not found");
    };

    let mut turns = match state.turn_log.read(&session_id) {
        Ok(turns) => turns,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "turn log read failed");
            return error_reply(StatusCode::INTERNAL_SERVER_ERROR, "turn log unreadable");
        }
    };
    turns.sort_by_key(|t| t.turn_index);

    Json(json!({
        "session": entry,
        "turns": turns,
    }))
    .into_response()
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
