//! Raw model-delta contract.
//!
//! A model transport produces an ordered sequence of [`ModelDelta`]s
//! terminated by a delta carrying a [`FinishReason`]. Each delta may hold
//! reasoning text, visible content, and/or tool-call fragments; the engine's
//! classifier turns this raw shape into typed section events.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelDelta
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One incremental unit from the model stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDelta {
    /// Reasoning-channel text (models with a dedicated reasoning field).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Visible content text. May embed inline `<think>` markup, which the
    /// classifier treats exactly like the dedicated channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool-call fragments carried by this delta, keyed by parallel slot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallChunk>,

    /// Terminal marker. Present on at most the last delta of a round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReason>,

    /// Token usage, when the transport reports it (usually with the finish).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::stream::Usage>,
}

impl ModelDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish: Some(reason),
            ..Default::default()
        }
    }
}

/// One tool-call fragment within a delta.
///
/// A fragment carrying a call id + tool name opens a new invocation at its
/// slot; a fragment without an id appends argument text to the invocation
/// already open at that slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    /// Parallel-slot index for concurrently streamed calls.
    pub slot: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Argument text fragment (accumulates into a JSON object).
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallChunk {
    /// Fragment that opens a new invocation at `slot`.
    pub fn open(slot: usize, call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            slot,
            call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            arguments: String::new(),
        }
    }

    /// Fragment that appends argument text to the open invocation at `slot`.
    pub fn append(slot: usize, arguments: impl Into<String>) -> Self {
        Self {
            slot,
            call_id: None,
            tool_name: None,
            arguments: arguments.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FinishReason
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why the model stopped producing deltas for this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the answer.
    Stop,
    /// The model wants its tool calls executed.
    ToolCalls,
    /// Token limit hit.
    Length,
    /// The transport observed a cancellation.
    Cancelled,
}

impl FinishReason {
    /// Map a wire finish-reason string to the canonical variant.
    /// Unknown values fall back to `Stop`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            "cancelled" | "canceled" | "abort" => Self::Cancelled,
            _ => Self::Stop,
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
