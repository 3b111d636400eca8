//! HTTP API over the turn engine.
//!
//! Routes live under `/v1` except the bare `/health` liveness probe.

pub mod chat;
pub mod health;
pub mod sessions;
pub mod turns;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Every route the gateway serves, state not yet applied.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        // Chat (core engine)
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        // Turn control
        .route("/v1/turns/:id/cancel", post(turns::cancel_turn))
        // Sessions
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id/history", get(sessions::session_history))
}
