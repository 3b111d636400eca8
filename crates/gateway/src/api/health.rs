//! Liveness probe.

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health — liveness plus a subsystem head-count.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transports": state.transports.len(),
        "tools": state.tools.len(),
        "mcp_servers": state.mcp.connected_count(),
        "running_turns": state.turns.running_count(),
    }))
}
