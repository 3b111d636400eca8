//! Transport for the Anthropic Messages API.
//!
//! Two quirks of this API shape the adapter. System text does not travel
//! as a message; it rides in a top-level `system` field, so the request
//! builder peels those off first. And streamed output arrives as indexed
//! content blocks; the block index maps straight onto the engine's slot
//! notion, which is what keeps interleaved tool-use blocks separable.

use crate::traits::{ChatRequest, ChatResponse, ModelTransport};
use crate::util::{from_reqwest, http_error, json_str, json_u64, resolve_api_key};
use serde::Serialize;
use serde_json::Value;
use tern_domain::config::TransportConfig;
use tern_domain::delta::{FinishReason, ModelDelta, ToolCallChunk};
use tern_domain::error::{Error, Result};
use tern_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition, ToolInvocation};
use tern_domain::stream::{DeltaStream, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const HTTP_TIMEOUT_SECS: u64 = 120;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicTransport {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl AnthropicTransport {
    /// Build from config. Anthropic has no unauthenticated mode, so a key
    /// that cannot be resolved fails construction rather than the first
    /// request.
    pub fn from_config(cfg: &TransportConfig) -> Result<Self> {
        let Some(api_key) = resolve_api_key(cfg) else {
            return Err(Error::Config(format!(
                "transport `{}`: environment variable `{}` is not set",
                cfg.id,
                cfg.api_key_env()
            )));
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(from_reqwest)?;

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            id: cfg.id.clone(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            default_model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            client,
        })
    }

    /// POST to `/v1/messages`, failing on any non-2xx status.
    async fn post_messages(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);
        tracing::debug!(transport = %self.id, url = %url, "anthropic request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(http_error(&self.id, status, &detail))
        }
    }

    fn request_body(&self, req: &ChatRequest, stream: bool) -> Result<Value> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();

        // System messages leave the list; everything else becomes a wire
        // message in order.
        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.text()),
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.text(),
                })),
                Role::Assistant => messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": assistant_blocks(msg),
                })),
                // Tool results go back as user-role tool_result blocks.
                Role::Tool => messages.push(serde_json::json!({
                    "role": "user",
                    "content": tool_result_blocks(msg),
                })),
            }
        }

        let body = MessagesBody {
            model: req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            messages,
            max_tokens: req.max_tokens.unwrap_or(self.max_tokens),
            stream,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            tools: req.tools.iter().map(wire_tool).collect(),
            temperature: req.temperature.or(self.temperature),
        };
        Ok(serde_json::to_value(body)?)
    }
}

#[derive(Serialize)]
struct MessagesBody {
    model: String,
    messages: Vec<Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn text_block(text: &str) -> Value {
    serde_json::json!({ "type": "text", "text": text })
}

fn assistant_blocks(msg: &Message) -> Vec<Value> {
    match &msg.content {
        MessageContent::Text(t) => vec![text_block(t)],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text_block(text)),
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                _ => None,
            })
            .collect(),
    }
}

fn tool_result_blocks(msg: &Message) -> Vec<Value> {
    match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        // A bare-text tool message has lost its call id; send it anyway.
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Answer parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flatten a non-streaming `message` object into a [`ChatResponse`].
/// Block position doubles as the invocation slot.
fn parse_message(body: &Value) -> Result<ChatResponse> {
    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls: Vec<ToolInvocation> = Vec::new();

    let blocks = body.get("content").and_then(Value::as_array);
    for (slot, block) in blocks.into_iter().flatten().enumerate() {
        match json_str(block, "type").unwrap_or("") {
            "text" => text.push_str(json_str(block, "text").unwrap_or("")),
            "thinking" => thinking.push_str(json_str(block, "thinking").unwrap_or("")),
            "tool_use" => tool_calls.push(ToolInvocation {
                call_id: json_str(block, "id").unwrap_or("").to_owned(),
                tool_name: json_str(block, "name").unwrap_or("").to_owned(),
                arguments: block
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                slot,
            }),
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text,
        reasoning: (!thinking.is_empty()).then_some(thinking),
        tool_calls,
        usage: body.get("usage").and_then(usage_from),
        model: json_str(body, "model").unwrap_or("unknown").to_owned(),
        finish_reason: json_str(body, "stop_reason").map(FinishReason::from_wire),
    })
}

fn usage_from(v: &Value) -> Option<Usage> {
    let prompt = json_u64(v, "input_tokens")? as u32;
    let completion = json_u64(v, "output_tokens")? as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct SseState {
    /// Block indices currently streaming tool-use input.
    open_tool_blocks: std::collections::HashSet<usize>,
    /// Captured at message_start, completed by message_delta.
    usage: Option<Usage>,
    finish_emitted: bool,
}

/// Translate one SSE data payload into deltas.
fn sse_payload_deltas(data: &str, state: &mut SseState) -> Vec<Result<ModelDelta>> {
    let payload: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut out = Vec::new();
    match json_str(&payload, "type").unwrap_or("") {
        "message_start" => {
            state.usage = payload
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(usage_from);
        }

        "content_block_start" => {
            let slot = json_u64(&payload, "index").unwrap_or(0) as usize;
            if let Some(block) = payload.get("content_block") {
                if json_str(block, "type") == Some("tool_use") {
                    let id = json_str(block, "id").unwrap_or("");
                    let name = json_str(block, "name").unwrap_or("");
                    state.open_tool_blocks.insert(slot);
                    out.push(Ok(ModelDelta {
                        tool_calls: vec![ToolCallChunk::open(slot, id, name)],
                        ..Default::default()
                    }));
                }
            }
        }

        "content_block_delta" => {
            let slot = json_u64(&payload, "index").unwrap_or(0) as usize;
            if let Some(delta) = payload.get("delta") {
                match json_str(delta, "type").unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = json_str(delta, "text").filter(|t| !t.is_empty()) {
                            out.push(Ok(ModelDelta::content(text)));
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = json_str(delta, "thinking").filter(|t| !t.is_empty()) {
                            out.push(Ok(ModelDelta::reasoning(text)));
                        }
                    }
                    "input_json_delta" => {
                        // Fragments for blocks we never opened (non-tool
                        // blocks) are dropped.
                        let fragment = json_str(delta, "partial_json").unwrap_or("");
                        if !fragment.is_empty() && state.open_tool_blocks.contains(&slot) {
                            out.push(Ok(ModelDelta {
                                tool_calls: vec![ToolCallChunk::append(slot, fragment)],
                                ..Default::default()
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let slot = json_u64(&payload, "index").unwrap_or(0) as usize;
            state.open_tool_blocks.remove(&slot);
        }

        "message_delta" => {
            if let Some(tokens) = payload.get("usage").and_then(|u| json_u64(u, "output_tokens")) {
                if let Some(usage) = state.usage.as_mut() {
                    usage.completion_tokens = tokens as u32;
                    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                }
            }
            let reason = payload
                .get("delta")
                .and_then(|d| json_str(d, "stop_reason"))
                .map(FinishReason::from_wire);
            if let Some(reason) = reason {
                state.finish_emitted = true;
                out.push(Ok(ModelDelta {
                    finish: Some(reason),
                    usage: state.usage,
                    ..Default::default()
                }));
            }
        }

        "message_stop" => {
            // Only reached when message_delta carried no stop_reason.
            if !state.finish_emitted {
                state.finish_emitted = true;
                out.push(Ok(ModelDelta {
                    finish: Some(FinishReason::Stop),
                    usage: state.usage,
                    ..Default::default()
                }));
            }
        }

        "error" => {
            let message = payload
                .get("error")
                .and_then(|e| json_str(e, "message"))
                .unwrap_or("unknown error");
            out.push(Err(Error::transport("anthropic", message)));
        }

        // ping and future event types
        _ => {}
    }

    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelTransport impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelTransport for AnthropicTransport {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.request_body(&req, false)?;
        let response = self.post_messages(&body).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        parse_message(&payload)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<DeltaStream> {
        let body = self.request_body(&req, true)?;
        let response = self.post_messages(&body).await?;

        let mut state = SseState::default();
        Ok(crate::sse::sse_delta_stream(response, move |data| {
            sse_payload_deltas(data, &mut state)
        }))
    }

    fn transport_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn one(state: &mut SseState, data: &str) -> ModelDelta {
        let mut deltas = sse_payload_deltas(data, state);
        assert_eq!(deltas.len(), 1);
        deltas.remove(0).expect("ok")
    }

    #[test]
    fn tool_use_block_start_opens_chunk_at_block_index() {
        let mut state = SseState::default();
        let d = one(
            &mut state,
            r#"{"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"toolu_1","name":"search"}}"#,
        );
        assert_eq!(d.tool_calls.len(), 1);
        assert_eq!(d.tool_calls[0].slot, 2);
        assert_eq!(d.tool_calls[0].call_id.as_deref(), Some("toolu_1"));
        assert!(state.open_tool_blocks.contains(&2));
    }

    #[test]
    fn input_json_delta_appends_to_open_block() {
        let mut state = SseState::default();
        state.open_tool_blocks.insert(1);
        let d = one(
            &mut state,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"url\":"}}"#,
        );
        assert_eq!(d.tool_calls[0].slot, 1);
        assert!(d.tool_calls[0].call_id.is_none());
        assert_eq!(d.tool_calls[0].arguments, "{\"url\":");
    }

    #[test]
    fn input_json_delta_for_unknown_block_is_dropped() {
        let mut state = SseState::default();
        let deltas = sse_payload_deltas(
            r#"{"type":"content_block_delta","index":7,"delta":{"type":"input_json_delta","partial_json":"x"}}"#,
            &mut state,
        );
        assert!(deltas.is_empty());
    }

    #[test]
    fn thinking_delta_becomes_reasoning() {
        let mut state = SseState::default();
        let d = one(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        );
        assert_eq!(d.reasoning.as_deref(), Some("hmm"));
    }

    #[test]
    fn text_delta_becomes_content() {
        let mut state = SseState::default();
        let d = one(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert_eq!(d.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn message_delta_maps_stop_reason_and_merges_usage() {
        let mut state = SseState::default();
        sse_payload_deltas(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            &mut state,
        );
        let d = one(
            &mut state,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        );
        assert_eq!(d.finish, Some(FinishReason::ToolCalls));
        let usage = d.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 9);
        assert_eq!(usage.total_tokens, 21);
    }

    #[test]
    fn message_stop_without_prior_finish_emits_stop() {
        let mut state = SseState::default();
        let d = one(&mut state, r#"{"type":"message_stop"}"#);
        assert_eq!(d.finish, Some(FinishReason::Stop));

        // A second stop after a finish is swallowed.
        let deltas = sse_payload_deltas(r#"{"type":"message_stop"}"#, &mut state);
        assert!(deltas.is_empty());
    }

    #[test]
    fn error_event_surfaces_as_err() {
        let mut state = SseState::default();
        let deltas = sse_payload_deltas(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#,
            &mut state,
        );
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].is_err());
    }

    #[test]
    fn body_extracts_system_and_maps_tools() {
        let transport = AnthropicTransport {
            id: "claude".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: "k".into(),
            default_model: "claude-sonnet-4-0".into(),
            max_tokens: 2048,
            temperature: None,
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![Message::system("Be brief."), Message::user("hello")],
            tools: vec![ToolDefinition {
                name: "fetch".into(),
                description: "Fetch a URL".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = transport.request_body(&req, true).unwrap();
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn body_omits_empty_tools_and_absent_temperature() {
        let transport = AnthropicTransport {
            id: "claude".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: "k".into(),
            default_model: "claude-sonnet-4-0".into(),
            max_tokens: 1024,
            temperature: None,
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = transport.request_body(&req, false).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn non_streaming_response_parses_mixed_blocks() {
        let body: Value = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-0",
                "content": [
                    {"type": "thinking", "thinking": "considering"},
                    {"type": "text", "text": "Answer."},
                    {"type": "tool_use", "id": "toolu_2", "name": "search", "input": {"queries": ["x"]}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 4, "output_tokens": 6}
            }"#,
        )
        .unwrap();
        let resp = parse_message(&body).unwrap();
        assert_eq!(resp.content, "Answer.");
        assert_eq!(resp.reasoning.as_deref(), Some("considering"));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].slot, 2);
        assert_eq!(resp.finish_reason, Some(FinishReason::ToolCalls));
    }
}
