//! Outbound packet protocol.
//!
//! The engine emits a strictly ordered sequence of [`Packet`]s per turn.
//! Packets for one logical section (reasoning, message, or tool activity)
//! are contiguous and framed: a start packet, zero or more deltas, exactly
//! one end marker, before the next section's start. The final packet of a
//! successfully completed turn is always `stop`.

use serde::{Deserialize, Serialize};

use crate::delta::FinishReason;
use crate::document::DocumentRef;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Packet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of the outbound protocol, tagged with its turn-relative
/// section index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Turn-relative section index. Increments once per opened section;
    /// turn-level packets (`citation_info`, `stop`, `error`) carry the
    /// index of the last section.
    pub section: u32,
    #[serde(flatten)]
    pub payload: PacketPayload,
}

impl Packet {
    pub fn new(section: u32, payload: PacketPayload) -> Self {
        Self { section, payload }
    }
}

/// Payload variants of the outbound protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PacketPayload {
    #[serde(rename = "reasoning_start")]
    ReasoningStart,

    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { text: String },

    /// Closes a reasoning section (reasoning has its own end marker).
    #[serde(rename = "reasoning_done")]
    ReasoningDone,

    #[serde(rename = "message_start")]
    MessageStart,

    #[serde(rename = "message_delta")]
    MessageDelta { text: String },

    #[serde(rename = "tool_start")]
    ToolStart { call_id: String, tool_name: String },

    /// Progress text for a running tool section.
    #[serde(rename = "tool_delta")]
    ToolDelta { text: String },

    /// Documents surfaced by a tool, with their assigned citation numbers.
    #[serde(rename = "tool_documents")]
    ToolDocuments { documents: Vec<CitedDocument> },

    /// Citation pairs for numbers actually referenced in the visible text.
    #[serde(rename = "citation_info")]
    CitationInfo { citations: Vec<CitationEntry> },

    /// Closes a message or tool section.
    #[serde(rename = "section_end")]
    SectionEnd,

    /// Terminal marker of a successfully completed turn.
    #[serde(rename = "stop")]
    Stop { finish_reason: FinishReason },

    /// Turn-fatal error. Always the last packet when present.
    #[serde(rename = "error")]
    Error { message: String },
}

impl PacketPayload {
    /// Whether this payload terminates the turn stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stop { .. } | Self::Error { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A document plus the citation number the ledger assigned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitedDocument {
    pub number: u32,
    #[serde(flatten)]
    pub document: DocumentRef,
}

/// One `(citation_number, document_unique_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationEntry {
    pub number: u32,
    pub document_unique_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
