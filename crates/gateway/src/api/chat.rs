//! Chat endpoints, the front door of the turn engine.
//!
//! `POST /v1/chat` runs a turn to completion and answers once with the
//! aggregated result. `POST /v1/chat/stream` answers as SSE: a leading
//! `turn` event with the ids, then one `packet` event per engine packet.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use tern_domain::packet::{CitedDocument, Packet, PacketPayload};

use crate::engine::{run_turn, TurnInput, TurnRegistry};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message text.
    pub message: String,
    /// Explicit session id. Absent = a new session is minted.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Transport override (a `[llm]` transport id).
    #[serde(default)]
    pub transport: Option<String>,
    /// Model override passed through to the transport.
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    fn into_input(self, session_id: String) -> TurnInput {
        TurnInput {
            session_id,
            user_message: self.message,
            transport: self.transport,
            model: self.model,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if let Err(resp) = preflight_transport(&state) {
        return resp.into_response();
    }

    let (entry, _is_new) = state.sessions.resolve_or_create(body.session_id.as_deref());
    let session_id = entry.session_id;
    let (turn_id, mut rx) = run_turn(state.clone(), body.into_input(session_id.clone()));

    let mut agg = TurnAggregate::default();
    while let Some(packet) = rx.recv().await {
        agg.absorb(packet.payload);
    }

    Json(agg.into_body(turn_id, &session_id)).into_response()
}

/// Everything a non-streaming caller gets back, collected while the
/// packet stream drains.
#[derive(Default)]
struct TurnAggregate {
    answer: String,
    reasoning: String,
    tool_calls: Vec<serde_json::Value>,
    documents: Vec<CitedDocument>,
    citations: Vec<serde_json::Value>,
    error: Option<String>,
    finish_reason: Option<String>,
}

impl TurnAggregate {
    fn absorb(&mut self, payload: PacketPayload) {
        match payload {
            PacketPayload::MessageDelta { text } => self.answer.push_str(&text),
            PacketPayload::ReasoningDelta { text } => self.reasoning.push_str(&text),
            PacketPayload::ToolStart { call_id, tool_name } => self.tool_calls.push(json!({
                "call_id": call_id,
                "tool_name": tool_name,
                "content": "",
            })),
            // Tool output is streamed; it always belongs to the call
            // opened last.
            PacketPayload::ToolDelta { text } => {
                if let Some(serde_json::Value::String(content)) =
                    self.tool_calls.last_mut().and_then(|c| c.get_mut("content"))
                {
                    content.push_str(&text);
                }
            }
            PacketPayload::ToolDocuments { documents } => self.documents.extend(documents),
            PacketPayload::CitationInfo { citations } => {
                self.citations = citations
                    .iter()
                    .map(|e| cited_value(&self.documents, e.number, &e.document_unique_id))
                    .collect();
            }
            PacketPayload::Stop { finish_reason } => {
                self.finish_reason = Some(finish_reason.to_string());
            }
            PacketPayload::Error { message } => self.error = Some(message),
            PacketPayload::ReasoningStart
            | PacketPayload::ReasoningDone
            | PacketPayload::MessageStart
            | PacketPayload::SectionEnd => {}
        }
    }

    fn into_body(self, turn_id: Uuid, session_id: &str) -> serde_json::Value {
        json!({
            "turn_id": turn_id,
            "session_id": session_id,
            "answer": self.answer,
            "reasoning": (!self.reasoning.is_empty()).then_some(self.reasoning),
            "citations": self.citations,
            "tool_calls": self.tool_calls,
            "finish_reason": self.finish_reason,
            "error": self.error,
        })
    }
}

/// A citation rendered with its full document when one was collected,
/// or just the `(number, unique_id)` pair when not.
fn cited_value(documents: &[CitedDocument], number: u32, unique_id: &str) -> serde_json::Value {
    documents
        .iter()
        .find(|d| d.number == number)
        .and_then(|doc| serde_json::to_value(doc).ok())
        .unwrap_or_else(|| json!({ "number": number, "unique_id": unique_id }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if let Err(resp) = preflight_transport(&state) {
        return resp.into_response();
    }

    let (entry, _is_new) = state.sessions.resolve_or_create(body.session_id.as_deref());
    let session_id = entry.session_id;
    let (turn_id, rx) = run_turn(state.clone(), body.into_input(session_id.clone()));

    let stream = sse_packet_stream(rx, session_id, turn_id, state.turns.clone());
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Cancels the turn when the client goes away mid-stream. A turn that
/// already reached a terminal state is left alone.
struct DisconnectGuard {
    turns: Arc<TurnRegistry>,
    turn_id: Uuid,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.turns.is_running(&self.turn_id) {
            tracing::info!(turn_id = %self.turn_id, "client disconnected, cancelling turn");
            self.turns.cancel(&self.turn_id);
        }
    }
}

fn sse_packet_stream(
    mut rx: tokio::sync::mpsc::Receiver<Packet>,
    session_id: String,
    turn_id: Uuid,
    turns: Arc<TurnRegistry>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let _guard = DisconnectGuard { turns, turn_id };

        // The client needs the ids up front to be able to cancel.
        let header = json!({ "turn_id": turn_id, "session_id": session_id });
        yield Ok(Event::default().event("turn").data(header.to_string()));

        while let Some(packet) = rx.recv().await {
            let data = serde_json::to_string(&packet).unwrap_or_default();
            yield Ok(Event::default().event("packet").data(data));
        }
        // Dropping the guard here cancels a turn the client abandoned.
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pre-flight
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured 503 when no model transport is configured beats a vague
/// turn error buried in the stream.
fn preflight_transport(state: &AppState) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if !state.transports.is_empty() {
        return Ok(());
    }
    Err((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "no_transport_configured",
            "reason": "No model transports are available. Add an [[llm.transports]] \
                       entry to config.toml and set its API key.",
        })),
    ))
}
