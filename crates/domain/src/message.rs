//! Conversation messages and tool-call records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool invocations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A complete, ready-to-run tool call assembled from stream fragments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Opaque token from the model, unique within the turn.
    pub call_id: String,
    pub tool_name: String,
    /// Parsed argument object.
    pub arguments: Value,
    /// Parallel-slot index the call streamed on.
    #[serde(default)]
    pub slot: usize,
}

/// A tool the model may invoke, in JSON-schema function form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: plain text or structured parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    fn plain(role: Role, text: &str) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn with_result(call_id: &str, content: &str, is_error: bool) -> Self {
        let part = ContentPart::ToolResult {
            tool_use_id: call_id.to_string(),
            content: content.to_string(),
            is_error,
        };
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![part]),
        }
    }

    pub fn system(text: &str) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: &str) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: &str) -> Self {
        Self::plain(Role::Assistant, text)
    }

    pub fn tool_result(call_id: &str, content: &str) -> Self {
        Self::with_result(call_id, content, false)
    }

    pub fn tool_error(call_id: &str, content: &str) -> Self {
        Self::with_result(call_id, content, true)
    }

    /// Assistant message carrying visible text plus tool-use parts, as fed
    /// back into history before tool results.
    pub fn assistant_tool_uses(text: &str, invocations: &[ToolInvocation]) -> Self {
        let mut parts = Vec::with_capacity(invocations.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        parts.extend(invocations.iter().map(|inv| ContentPart::ToolUse {
            id: inv.call_id.clone(),
            name: inv.tool_name.clone(),
            input: inv.arguments.clone(),
        }));
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    /// Flatten the content to display text (tool parts are skipped).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
