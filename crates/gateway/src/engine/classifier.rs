//! Delta classifier: raw model deltas → typed stream events.
//!
//! Transports emit [`ModelDelta`]s whose shape varies by provider.  The
//! classifier normalizes them into a flat event sequence the rest of the
//! engine consumes, applying per delta, in order:
//!
//! 1. an explicit `reasoning` field becomes reasoning text;
//! 2. tool-call fragments pass through keyed by slot;
//! 3. plain content becomes message text — except that inline
//!    `<think>`…`</think>` markup embedded in the content channel is
//!    rerouted to reasoning, exactly as if it had arrived on the dedicated
//!    field;
//! 4. a finish reason flushes held state and terminates the round.
//!
//! Markers can be split across fragment boundaries, so a trailing partial
//! marker is carried until the next fragment decides what it was.

use tern_domain::delta::{FinishReason, ModelDelta, ToolCallChunk};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// One classified event.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEvent {
    Reasoning(String),
    Message(String),
    ToolFragment(ToolCallChunk),
    Finish(FinishReason),
}

/// Length of the longest suffix of `text` that is a proper prefix of
/// `marker` — i.e. the part that might grow into the marker next fragment.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        if !text.is_char_boundary(text.len() - len) {
            continue;
        }
        if marker.starts_with(&text[text.len() - len..]) {
            return len;
        }
    }
    0
}

#[derive(Default)]
pub struct DeltaClassifier {
    /// Inside an inline `<think>` span on the content channel.
    inline_think: bool,
    /// Trailing text that may be the start of a split marker.
    carry: String,
}

impl DeltaClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one delta into zero or more events.
    pub fn classify(&mut self, delta: ModelDelta) -> Vec<DeltaEvent> {
        let mut events = Vec::new();

        if let Some(reasoning) = delta.reasoning {
            if !reasoning.is_empty() {
                events.push(DeltaEvent::Reasoning(reasoning));
            }
        }

        for chunk in delta.tool_calls {
            events.push(DeltaEvent::ToolFragment(chunk));
        }

        if let Some(content) = delta.content {
            self.classify_content(&content, &mut events);
        }

        if let Some(finish) = delta.finish {
            self.flush_into(&mut events);
            events.push(DeltaEvent::Finish(finish));
        }

        events
    }

    /// Emit whatever the carry buffer holds — called when the stream ends
    /// without a finish marker and the held text turned out to be plain.
    pub fn flush(&mut self) -> Vec<DeltaEvent> {
        let mut events = Vec::new();
        self.flush_into(&mut events);
        events
    }

    fn flush_into(&mut self, out: &mut Vec<DeltaEvent>) {
        if self.carry.is_empty() {
            return;
        }
        let held = std::mem::take(&mut self.carry);
        self.emit_run(&held, out);
    }

    fn emit_run(&self, text: &str, out: &mut Vec<DeltaEvent>) {
        if text.is_empty() {
            return;
        }
        if self.inline_think {
            out.push(DeltaEvent::Reasoning(text.to_string()));
        } else {
            out.push(DeltaEvent::Message(text.to_string()));
        }
    }

    fn classify_content(&mut self, content: &str, out: &mut Vec<DeltaEvent>) {
        // Re-attach any held partial marker before scanning.
        let mut haystack = if self.carry.is_empty() {
            content.to_string()
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.push_str(content);
            joined
        };

        loop {
            let marker = if self.inline_think {
                THINK_CLOSE
            } else {
                THINK_OPEN
            };

            if let Some(idx) = haystack.find(marker) {
                self.emit_run(&haystack[..idx], out);
                haystack = haystack[idx + marker.len()..].to_string();
                self.inline_think = !self.inline_think;
                continue;
            }

            // No full marker — hold back a trailing fragment of one.
            let held = partial_marker_len(&haystack, marker);
            if held > 0 {
                let split = haystack.len() - held;
                self.carry = haystack[split..].to_string();
                self.emit_run(&haystack[..split], out);
            } else {
                self.emit_run(&haystack, out);
            }
            break;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(events: &[DeltaEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                DeltaEvent::Message(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn reasoning(events: &[DeltaEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                DeltaEvent::Reasoning(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn dedicated_reasoning_field() {
        let mut c = DeltaClassifier::new();
        let events = c.classify(ModelDelta::reasoning("thinking"));
        assert_eq!(events, vec![DeltaEvent::Reasoning("thinking".into())]);
    }

    #[test]
    fn plain_content_is_message() {
        let mut c = DeltaClassifier::new();
        let events = c.classify(ModelDelta::content("hello"));
        assert_eq!(events, vec![DeltaEvent::Message("hello".into())]);
    }

    #[test]
    fn rule_order_within_one_delta() {
        let mut c = DeltaClassifier::new();
        let delta = ModelDelta {
            reasoning: Some("r".into()),
            content: Some("m".into()),
            tool_calls: vec![ToolCallChunk::append(0, "{}")],
            finish: Some(FinishReason::Stop),
            usage: None,
        };
        let events = c.classify(delta);
        assert!(matches!(events[0], DeltaEvent::Reasoning(_)));
        assert!(matches!(events[1], DeltaEvent::ToolFragment(_)));
        assert!(matches!(events[2], DeltaEvent::Message(_)));
        assert!(matches!(events[3], DeltaEvent::Finish(FinishReason::Stop)));
    }

    #[test]
    fn inline_think_in_one_fragment() {
        let mut c = DeltaClassifier::new();
        let events = c.classify(ModelDelta::content("a<think>b</think>c"));
        assert_eq!(msgs(&events), "ac");
        assert_eq!(reasoning(&events), "b");
    }

    #[test]
    fn inline_think_spanning_fragments() {
        let mut c = DeltaClassifier::new();
        let mut all = Vec::new();
        all.extend(c.classify(ModelDelta::content("<think>let me ")));
        all.extend(c.classify(ModelDelta::content("check</think>The answer")));
        assert_eq!(reasoning(&all), "let me check");
        assert_eq!(msgs(&all), "The answer");
    }

    #[test]
    fn marker_split_across_fragments() {
        let mut c = DeltaClassifier::new();
        let mut all = Vec::new();
        all.extend(c.classify(ModelDelta::content("answer <thi")));
        all.extend(c.classify(ModelDelta::content("nk>secret</thi")));
        all.extend(c.classify(ModelDelta::content("nk> done")));
        assert_eq!(msgs(&all), "answer  done");
        assert_eq!(reasoning(&all), "secret");
    }

    #[test]
    fn false_partial_marker_is_flushed_as_text() {
        let mut c = DeltaClassifier::new();
        let mut all = Vec::new();
        all.extend(c.classify(ModelDelta::content("a < b and <th")));
        all.extend(c.classify(ModelDelta::content("at is all")));
        assert_eq!(msgs(&all), "a < b and <that is all");
        assert!(reasoning(&all).is_empty());
    }

    #[test]
    fn finish_flushes_held_partial() {
        let mut c = DeltaClassifier::new();
        let mut all = Vec::new();
        all.extend(c.classify(ModelDelta::content("tail <th")));
        all.extend(c.classify(ModelDelta::finish(FinishReason::Stop)));
        assert_eq!(msgs(&all), "tail <th");
        assert!(matches!(all.last(), Some(DeltaEvent::Finish(FinishReason::Stop))));
    }

    #[test]
    fn stray_close_marker_stays_text() {
        let mut c = DeltaClassifier::new();
        let events = c.classify(ModelDelta::content("oops</think> fine"));
        assert_eq!(msgs(&events), "oops</think> fine");
    }

    #[test]
    fn tool_fragments_pass_through_in_order() {
        let mut c = DeltaClassifier::new();
        let delta = ModelDelta {
            tool_calls: vec![
                ToolCallChunk::open(0, "call_1", "doc_search"),
                ToolCallChunk::append(1, "{\"q\""),
            ],
            ..Default::default()
        };
        let events = c.classify(delta);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DeltaEvent::ToolFragment(chunk) if chunk.slot == 0
        ));
        assert!(matches!(
            &events[1],
            DeltaEvent::ToolFragment(chunk) if chunk.slot == 1
        ));
    }

    #[test]
    fn flush_without_finish_returns_carry() {
        let mut c = DeltaClassifier::new();
        let _ = c.classify(ModelDelta::content("partial </thi"));
        // Not in think mode, so "</thi" never matched the open marker and
        // was emitted as text already; nothing held.
        assert!(c.flush().is_empty());

        let _ = c.classify(ModelDelta::content("<think>x</th"));
        let events = c.flush();
        assert_eq!(reasoning(&events), "</th");
    }

    #[test]
    fn multibyte_content_near_marker_boundary() {
        let mut c = DeltaClassifier::new();
        let events = c.classify(ModelDelta::content("héllo <think>ö</think> wörld"));
        assert_eq!(msgs(&events), "héllo  wörld");
        assert_eq!(reasoning(&events), "ö");
    }
}
