//! Adapter for OpenAI-style chat completion endpoints.
//!
//! The same wire contract is served by OpenAI itself and by most local
//! inference servers (Ollama, vLLM, LM Studio, Together), so one transport
//! covers them all. Tool-call fragments carry a wire `index`; that index
//! becomes the invocation slot, the same convention the Anthropic adapter
//! derives from content-block positions.

use crate::traits::{ChatRequest, ChatResponse, ModelTransport};
use crate::util::{from_reqwest, http_error, json_str, json_u64, resolve_api_key};
use serde::Serialize;
use serde_json::Value;
use tern_domain::config::TransportConfig;
use tern_domain::delta::{FinishReason, ModelDelta, ToolCallChunk};
use tern_domain::error::{Error, Result};
use tern_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition, ToolInvocation};
use tern_domain::stream::{DeltaStream, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const HTTP_TIMEOUT_SECS: u64 = 120;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatTransport {
    id: String,
    base_url: String,
    /// Local inference servers typically run without auth.
    api_key: Option<String>,
    default_model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiCompatTransport {
    /// Build from config. A missing API key is not an error here; only
    /// the endpoint knows whether it wants one.
    pub fn from_config(cfg: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(from_reqwest)?;

        let base_url = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            id: cfg.id.clone(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: resolve_api_key(cfg),
            default_model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            client,
        })
    }

    /// POST to `/chat/completions`, failing on any non-2xx status.
    async fn post_completions(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(transport = %self.id, url = %url, "openai_compat request");

        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(from_reqwest)?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(http_error(&self.id, status, &detail))
        }
    }

    fn request_body(&self, req: &ChatRequest, stream: bool) -> Result<Value> {
        let body = ChatBody {
            model: req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            messages: req.messages.iter().map(wire_message).collect(),
            max_tokens: req.max_tokens.unwrap_or(self.max_tokens),
            stream,
            tools: req.tools.iter().map(wire_tool_def).collect(),
            temperature: req.temperature.or(self.temperature),
            // Without this the stream ends with no token accounting.
            stream_options: stream.then(|| serde_json::json!({ "include_usage": true })),
        };
        Ok(serde_json::to_value(body)?)
    }
}

#[derive(Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn wire_message(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => wire_assistant(msg),
        Role::Tool => wire_tool_result(msg),
        Role::System => serde_json::json!({ "role": "system", "content": msg.text() }),
        Role::User => serde_json::json!({ "role": "user", "content": msg.text() }),
    }
}

/// Assistant turns may interleave text and tool uses; the wire wants the
/// text joined under `content` and the uses under `tool_calls`.
fn wire_assistant(msg: &Message) -> Value {
    let (text, calls) = match &msg.content {
        MessageContent::Text(t) => (Some(t.clone()), Vec::new()),
        MessageContent::Parts(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            let calls: Vec<Value> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    })),
                    _ => None,
                })
                .collect();
            ((!texts.is_empty()).then(|| texts.join("\n")), calls)
        }
    };

    let mut obj = serde_json::json!({
        "role": "assistant",
        "content": match text {
            Some(t) => Value::String(t),
            None => Value::Null,
        },
    });
    if !calls.is_empty() {
        obj["tool_calls"] = Value::Array(calls);
    }
    obj
}

fn wire_tool_result(msg: &Message) -> Value {
    let (id, content) = match &msg.content {
        MessageContent::Text(t) => (String::new(), t.clone()),
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|part| match part {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some((tool_use_id.clone(), content.clone())),
                _ => None,
            })
            .unwrap_or_default(),
    };
    serde_json::json!({ "role": "tool", "tool_call_id": id, "content": content })
}

fn wire_tool_def(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": { "name": tool.name, "description": tool.description, "parameters": tool.parameters },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Answer parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_completion(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| Error::transport("openai_compat", "response carries no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| Error::transport("openai_compat", "choice carries no message"))?;

    Ok(ChatResponse {
        content: json_str(message, "content").unwrap_or("").to_owned(),
        reasoning: json_str(message, "reasoning_content")
            .filter(|s| !s.is_empty())
            .map(String::from),
        tool_calls: invocations_from(message),
        usage: body.get("usage").and_then(usage_from),
        model: json_str(body, "model").unwrap_or("unknown").to_owned(),
        finish_reason: json_str(choice, "finish_reason").map(FinishReason::from_wire),
    })
}

/// Array position is the slot; OpenAI reuses the same positions as the
/// streamed `index` values, so batch and stream agree.
fn invocations_from(message: &Value) -> Vec<ToolInvocation> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .enumerate()
        .filter_map(|(slot, call)| {
            let func = call.get("function")?;
            let raw = func.get("arguments")?.as_str().unwrap_or("{}");
            Some(ToolInvocation {
                call_id: json_str(call, "id")?.to_owned(),
                tool_name: json_str(func, "name")?.to_owned(),
                arguments: serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::Object(Default::default())),
                slot,
            })
        })
        .collect()
}

fn usage_from(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: json_u64(v, "prompt_tokens")? as u32,
        completion_tokens: json_u64(v, "completion_tokens")? as u32,
        total_tokens: json_u64(v, "total_tokens")? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate one SSE chunk into at most one combined delta.
///
/// A chunk may carry several of {content, reasoning, tool-call fragments,
/// finish, usage} at once; they all land on the same [`ModelDelta`] so the
/// downstream classifier sees them in their original order.
fn sse_chunk_delta(data: &str) -> Option<Result<ModelDelta>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    let choice = v
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    // With include_usage set, the final chunk has usage but no choices.
    let Some(choice) = choice else {
        let usage = v.get("usage").and_then(usage_from)?;
        return Some(Ok(ModelDelta {
            usage: Some(usage),
            ..Default::default()
        }));
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut out = ModelDelta::default();

    if let Some(text) = json_str(delta, "reasoning_content").filter(|t| !t.is_empty()) {
        out.reasoning = Some(text.to_owned());
    }
    if let Some(text) = json_str(delta, "content").filter(|t| !t.is_empty()) {
        out.content = Some(text.to_owned());
    }

    for call in delta
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let slot = json_u64(call, "index").unwrap_or(0) as usize;
        let func = call.get("function");
        let args = func.and_then(|f| json_str(f, "arguments")).unwrap_or("");

        if let Some(id) = json_str(call, "id") {
            let name = func.and_then(|f| json_str(f, "name")).unwrap_or("");
            // Some servers put the first argument bytes on the opening
            // fragment already.
            let mut chunk = ToolCallChunk::open(slot, id, name);
            chunk.arguments = args.to_owned();
            out.tool_calls.push(chunk);
        } else if !args.is_empty() {
            out.tool_calls.push(ToolCallChunk::append(slot, args));
        }
    }

    if let Some(reason) = json_str(choice, "finish_reason") {
        out.finish = Some(FinishReason::from_wire(reason));
    }
    if let Some(usage) = v.get("usage").and_then(usage_from) {
        out.usage = Some(usage);
    }

    let carries_nothing = out.reasoning.is_none()
        && out.content.is_none()
        && out.tool_calls.is_empty()
        && out.finish.is_none()
        && out.usage.is_none();
    if carries_nothing {
        return None;
    }
    Some(Ok(out))
}

/// Vec-shaped entry point for the shared SSE reader. Swallows the
/// `[DONE]` sentinel; the reader's fallback finish covers streams where
/// no finish_reason chunk preceded it.
fn sse_chunk_deltas(data: &str) -> Vec<Result<ModelDelta>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    sse_chunk_delta(data).into_iter().collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelTransport impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelTransport for OpenAiCompatTransport {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.request_body(&req, false)?;
        let response = self.post_completions(&body).await?;
        let payload: Value = response.json().await.map_err(from_reqwest)?;
        parse_completion(&payload)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<DeltaStream> {
        let body = self.request_body(&req, true)?;
        let response = self.post_completions(&body).await?;
        Ok(crate::sse::sse_delta_stream(response, sse_chunk_deltas))
    }

    fn transport_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
