//! Tool-call assembler: streamed fragments → complete invocations.
//!
//! Models emit tool calls as fragments keyed by a parallel-slot index: an
//! opening fragment carries the call id and tool name, later fragments at
//! the same slot append raw argument text.  Fragments for different slots
//! interleave arbitrarily; each slot accumulates independently.  A new call
//! id arriving at an occupied slot closes the previous invocation there.
//!
//! Argument text is parsed only at finalization.  A parse failure is
//! recorded on the invocation (the dispatcher reports it as a tool error)
//! and never aborts the turn.

use std::collections::HashMap;

use serde_json::Value;
use tern_domain::delta::ToolCallChunk;
use tern_domain::message::ToolInvocation;

/// A finalized invocation, plus the parse failure that produced its
/// placeholder arguments, if any.
#[derive(Debug, Clone)]
pub struct AssembledCall {
    pub invocation: ToolInvocation,
    pub parse_error: Option<String>,
}

struct OpenCall {
    call_id: String,
    tool_name: String,
    arguments: String,
    slot: usize,
    /// Order the invocation was opened in, across all slots.
    seq: usize,
}

impl OpenCall {
    fn finalize(self) -> AssembledCall {
        let trimmed = self.arguments.trim();
        let (arguments, parse_error) = if trimmed.is_empty() {
            (Value::Object(Default::default()), None)
        } else {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(v) => (v, None),
                Err(e) => (
                    Value::Object(Default::default()),
                    Some(format!("malformed tool arguments: {e}")),
                ),
            }
        };
        AssembledCall {
            invocation: ToolInvocation {
                call_id: self.call_id,
                tool_name: self.tool_name,
                arguments,
                slot: self.slot,
            },
            parse_error,
        }
    }
}

#[derive(Default)]
pub struct CallAssembler {
    open: HashMap<usize, OpenCall>,
    closed: Vec<OpenCall>,
    opened: usize,
}

impl CallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment.
    pub fn push(&mut self, chunk: ToolCallChunk) {
        match chunk.call_id {
            Some(id) => {
                // Same id again at this slot is just more argument text.
                if let Some(open) = self.open.get_mut(&chunk.slot) {
                    if open.call_id == id {
                        open.arguments.push_str(&chunk.arguments);
                        return;
                    }
                }
                // A different id closes the previous invocation at the slot.
                if let Some(previous) = self.open.remove(&chunk.slot) {
                    self.closed.push(previous);
                }
                self.open.insert(
                    chunk.slot,
                    OpenCall {
                        call_id: id,
                        tool_name: chunk.tool_name.unwrap_or_default(),
                        arguments: chunk.arguments,
                        slot: chunk.slot,
                        seq: self.opened,
                    },
                );
                self.opened += 1;
            }
            None => match self.open.get_mut(&chunk.slot) {
                Some(open) => open.arguments.push_str(&chunk.arguments),
                None => {
                    tracing::warn!(
                        slot = chunk.slot,
                        "tool-call fragment for a slot with no open invocation, dropping"
                    );
                }
            },
        }
    }

    /// Whether any invocation (open or already closed) has been seen.
    pub fn has_calls(&self) -> bool {
        !self.open.is_empty() || !self.closed.is_empty()
    }

    /// Close all open slots and return every invocation in the order it
    /// was opened.
    pub fn finish(&mut self) -> Vec<AssembledCall> {
        let mut all: Vec<OpenCall> = std::mem::take(&mut self.closed);
        all.extend(self.open.drain().map(|(_, call)| call));
        all.sort_by_key(|c| c.seq);
        all.into_iter().map(OpenCall::finalize).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assembles_fragments_for_one_slot() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "doc_search"));
        asm.push(ToolCallChunk::append(0, "{\"query\":"));
        asm.push(ToolCallChunk::append(0, "\"rust\"}"));

        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(call.parse_error.is_none());
        assert_eq!(call.invocation.call_id, "call_1");
        assert_eq!(call.invocation.tool_name, "doc_search");
        assert_eq!(call.invocation.arguments, json!({"query": "rust"}));
    }

    #[test]
    fn interleaved_slots_do_not_corrupt_each_other() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_a", "doc_search"));
        asm.push(ToolCallChunk::open(1, "call_b", "web_search"));
        asm.push(ToolCallChunk::append(0, "{\"q\":"));
        asm.push(ToolCallChunk::append(1, "{\"q\":\"y\""));
        asm.push(ToolCallChunk::append(0, "\"x\""));
        asm.push(ToolCallChunk::append(1, "}"));
        asm.push(ToolCallChunk::append(0, "}"));

        let calls = asm.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].invocation.call_id, "call_a");
        assert_eq!(calls[0].invocation.arguments, json!({"q": "x"}));
        assert_eq!(calls[1].invocation.call_id, "call_b");
        assert_eq!(calls[1].invocation.arguments, json!({"q": "y"}));
    }

    #[test]
    fn new_id_at_same_slot_closes_previous() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "fetch"));
        asm.push(ToolCallChunk::append(0, "{\"url\":\"a\"}"));
        asm.push(ToolCallChunk::open(0, "call_2", "fetch"));
        asm.push(ToolCallChunk::append(0, "{\"url\":\"b\"}"));

        let calls = asm.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].invocation.call_id, "call_1");
        assert_eq!(calls[0].invocation.arguments, json!({"url": "a"}));
        assert_eq!(calls[1].invocation.call_id, "call_2");
        assert_eq!(calls[1].invocation.arguments, json!({"url": "b"}));
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "doc_search"));

        let calls = asm.finish();
        assert_eq!(calls[0].invocation.arguments, json!({}));
        assert!(calls[0].parse_error.is_none());
    }

    #[test]
    fn malformed_arguments_are_flagged_not_fatal() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "doc_search"));
        asm.push(ToolCallChunk::append(0, "{\"query\": tru"));

        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].parse_error.is_some());
        // Identity survives so the error can be attributed to the call.
        assert_eq!(calls[0].invocation.call_id, "call_1");
        assert_eq!(calls[0].invocation.tool_name, "doc_search");
        assert_eq!(calls[0].invocation.arguments, json!({}));
    }

    #[test]
    fn orphan_fragment_is_dropped() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::append(3, "{\"q\":\"x\"}"));
        assert!(!asm.has_calls());
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn open_order_is_preserved_regardless_of_slot() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(2, "call_1", "a"));
        asm.push(ToolCallChunk::open(0, "call_2", "b"));
        asm.push(ToolCallChunk::open(1, "call_3", "c"));

        let ids: Vec<String> = asm
            .finish()
            .into_iter()
            .map(|c| c.invocation.call_id)
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
    }

    #[test]
    fn repeated_id_fragments_append() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "doc_search"));
        let mut chunk = ToolCallChunk::open(0, "call_1", "doc_search");
        chunk.arguments = "{\"q\":\"x\"}".into();
        asm.push(chunk);

        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].invocation.arguments, json!({"q": "x"}));
    }

    #[test]
    fn finish_resets_state() {
        let mut asm = CallAssembler::new();
        asm.push(ToolCallChunk::open(0, "call_1", "doc_search"));
        let _ = asm.finish();
        assert!(!asm.has_calls());
        assert!(asm.finish().is_empty());
    }
}
