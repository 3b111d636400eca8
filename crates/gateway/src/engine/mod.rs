//! The turn engine — classifier, assembler, citation ledger, dispatcher,
//! and packet emitter, driven by the orchestrator loop in [`turn`].
//!
//! Entry point: [`run_turn`] spawns the loop for one turn and returns the
//! packet receiver; [`TurnRegistry`] tracks live turns so the API layer can
//! cancel them.

pub mod assembler;
pub mod cancel;
pub mod citations;
pub mod classifier;
pub mod dispatch;
pub mod emitter;
pub mod turn;

pub use cancel::{CancelOutcome, CancelToken, TurnRegistry, TurnState};
pub use turn::{run_turn, TurnInput};

use tern_domain::message::Message;
use tern_sessions::TurnRecord;

/// Rebuild prompt history from saved turns.
///
/// Each prior turn collapses to its user message and final visible answer.
/// Reasoning is never replayed, and intra-turn tool traffic stays in the
/// record for audit without re-entering the prompt.
pub(crate) fn history_messages(records: &[TurnRecord]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(records.len() * 2);
    for record in records {
        messages.push(Message::user(&record.user_message));
        if !record.assistant_message.is_empty() {
            messages.push(Message::assistant(&record.assistant_message));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_domain::message::Role;

    fn record(index: u64, user: &str, assistant: &str) -> TurnRecord {
        TurnRecord {
            turn_index: index,
            created_at: chrono::Utc::now(),
            user_message: user.to_string(),
            assistant_message: assistant.to_string(),
            reasoning: Some("thinking aloud".to_string()),
            tool_calls: Vec::new(),
            citations: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: None,
        }
    }

    #[test]
    fn history_alternates_user_and_assistant() {
        let records = vec![record(0, "hi", "hello"), record(1, "more?", "sure")];
        let messages = history_messages(&records);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), "hello");
        assert_eq!(messages[3].text(), "sure");
    }

    #[test]
    fn history_never_replays_reasoning() {
        let messages = history_messages(&[record(0, "q", "a")]);
        assert!(messages.iter().all(|m| !m.text().contains("thinking aloud")));
    }

    #[test]
    fn empty_assistant_message_is_skipped() {
        let messages = history_messages(&[record(0, "q", "")]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
