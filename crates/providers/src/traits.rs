use tern_domain::delta::FinishReason;
use tern_domain::error::Result;
use tern_domain::message::{Message, ToolDefinition, ToolInvocation};
use tern_domain::stream::{DeltaStream, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request and response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One chat completion request, independent of any wire format.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Full conversation, oldest first.
    pub messages: Vec<Message>,
    /// Tools offered to the model for this request.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature; `None` defers to the transport's configured value.
    pub temperature: Option<f32>,
    /// Response token cap; `None` defers to the transport's configured value.
    pub max_tokens: Option<u32>,
    /// Model name override; `None` uses the transport default.
    pub model: Option<String>,
}

/// A complete (non-streamed) chat answer.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Visible answer text.
    pub content: String,
    /// Separate reasoning text, when the model reports one.
    pub reasoning: Option<String>,
    /// Tool invocations the model asked for.
    pub tool_calls: Vec<ToolInvocation>,
    /// Token accounting, when the upstream reported it.
    pub usage: Option<Usage>,
    /// Model that actually answered.
    pub model: String,
    /// Why generation ended.
    pub finish_reason: Option<FinishReason>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Implemented once per upstream wire format (Anthropic, OpenAI-compat).
///
/// An implementation owns the translation between the internal types and
/// its HTTP API.  The streaming contract is uniform across transports: an
/// ordered sequence of [`tern_domain::delta::ModelDelta`]s, the last of
/// which (when the upstream behaves) carries a [`FinishReason`].
#[async_trait::async_trait]
pub trait ModelTransport: Send + Sync {
    /// Run the request to completion and return the whole answer at once.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Run the request and surface the answer as a stream of raw deltas.
    async fn chat_stream(&self, req: ChatRequest) -> Result<DeltaStream>;

    /// Identifier of this transport instance, unique within the registry.
    fn transport_id(&self) -> &str;
}
