//! Packet emitter: the single writer on a turn's outbound channel.
//!
//! All packets of a turn flow through one `PacketEmitter`, which owns the
//! section framing: every reasoning / message / tool section is emitted as
//! `start, delta*, end` under one section index, sections never interleave,
//! and the index increments once per opened section.  Turn-level packets
//! (`citation_info`, `stop`, `error`) carry the index of the last section.
//!
//! Sends are best-effort: a receiver that went away does not fail the turn
//! (disconnect-driven cancellation is handled by the API layer).

use tokio::sync::mpsc;

use tern_domain::delta::FinishReason;
use tern_domain::packet::{CitationEntry, CitedDocument, Packet, PacketPayload};

/// What kind of section is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Reasoning,
    Message,
    Tool,
}

pub struct PacketEmitter {
    tx: mpsc::Sender<Packet>,
    /// Index of the most recently opened section (0 before the first).
    section: u32,
    open: Option<SectionKind>,
    opened_any: bool,
}

impl PacketEmitter {
    pub fn new(tx: mpsc::Sender<Packet>) -> Self {
        Self {
            tx,
            section: 0,
            open: None,
            opened_any: false,
        }
    }

    /// Index of the current (or last) section.
    pub fn section(&self) -> u32 {
        self.section
    }

    async fn send(&self, payload: PacketPayload) {
        let _ = self.tx.send(Packet::new(self.section, payload)).await;
    }

    /// Open a new section of `kind`, closing whatever is open first.
    async fn begin(&mut self, kind: SectionKind) {
        if self.open.is_some() {
            self.end_section().await;
        }
        if self.opened_any {
            self.section += 1;
        }
        self.opened_any = true;
        self.open = Some(kind);
        let start = match kind {
            SectionKind::Reasoning => PacketPayload::ReasoningStart,
            SectionKind::Message => PacketPayload::MessageStart,
            // Tool sections open through `tool_start`, which sends the
            // payload itself (it carries call id and name).
            SectionKind::Tool => return,
        };
        self.send(start).await;
    }

    /// Close the open section, if any.  Reasoning has its own end marker;
    /// message and tool sections share `section_end`.
    pub async fn end_section(&mut self) {
        let Some(kind) = self.open.take() else {
            return;
        };
        let end = match kind {
            SectionKind::Reasoning => PacketPayload::ReasoningDone,
            SectionKind::Message | SectionKind::Tool => PacketPayload::SectionEnd,
        };
        self.send(end).await;
    }

    /// Stream a reasoning token, opening a reasoning section when none is
    /// open.
    pub async fn reasoning_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.open != Some(SectionKind::Reasoning) {
            self.begin(SectionKind::Reasoning).await;
        }
        self.send(PacketPayload::ReasoningDelta {
            text: text.to_string(),
        })
        .await;
    }

    /// Stream a visible message token, opening a message section when none
    /// is open.
    pub async fn message_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.open != Some(SectionKind::Message) {
            self.begin(SectionKind::Message).await;
        }
        self.send(PacketPayload::MessageDelta {
            text: text.to_string(),
        })
        .await;
    }

    /// Open a tool section for one invocation.
    pub async fn tool_start(&mut self, call_id: &str, tool_name: &str) {
        self.begin(SectionKind::Tool).await;
        self.send(PacketPayload::ToolStart {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
        })
        .await;
    }

    /// Progress / result text inside the open tool section.
    pub async fn tool_delta(&mut self, text: &str) {
        if self.open != Some(SectionKind::Tool) || text.is_empty() {
            return;
        }
        self.send(PacketPayload::ToolDelta {
            text: text.to_string(),
        })
        .await;
    }

    /// Numbered documents produced inside the open tool section.
    pub async fn tool_documents(&mut self, documents: Vec<CitedDocument>) {
        if self.open != Some(SectionKind::Tool) || documents.is_empty() {
            return;
        }
        self.send(PacketPayload::ToolDocuments { documents }).await;
    }

    /// Turn-level citation map.  Closes any open section first so the
    /// packet lands after the final `section_end`.
    pub async fn citation_info(&mut self, citations: Vec<CitationEntry>) {
        self.end_section().await;
        self.send(PacketPayload::CitationInfo { citations }).await;
    }

    /// Terminal packet of a successful turn.
    pub async fn stop(&mut self, finish_reason: FinishReason) {
        self.end_section().await;
        self.send(PacketPayload::Stop { finish_reason }).await;
    }

    /// Terminal packet of a failed turn.
    pub async fn error(&mut self, message: &str) {
        self.end_section().await;
        self.send(PacketPayload::Error {
            message: message.to_string(),
        })
        .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::Receiver<Packet>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(p) = rx.recv().await {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn message_section_is_framed() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.message_delta("Hel").await;
        emitter.message_delta("lo").await;
        emitter.stop(FinishReason::Stop).await;
        drop(emitter);

        let packets = drain(rx).await;
        let payloads: Vec<&PacketPayload> = packets.iter().map(|p| &p.payload).collect();
        assert!(matches!(payloads[0], PacketPayload::MessageStart));
        assert!(matches!(payloads[1], PacketPayload::MessageDelta { text } if text == "Hel"));
        assert!(matches!(payloads[2], PacketPayload::MessageDelta { text } if text == "lo"));
        assert!(matches!(payloads[3], PacketPayload::SectionEnd));
        assert!(matches!(payloads[4], PacketPayload::Stop { .. }));
        // Everything under one section index.
        assert!(packets.iter().all(|p| p.section == 0));
    }

    #[tokio::test]
    async fn reasoning_closes_with_its_own_marker() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.reasoning_delta("hmm").await;
        emitter.message_delta("answer").await;
        emitter.stop(FinishReason::Stop).await;
        drop(emitter);

        let packets = drain(rx).await;
        let payloads: Vec<&PacketPayload> = packets.iter().map(|p| &p.payload).collect();
        assert!(matches!(payloads[0], PacketPayload::ReasoningStart));
        assert!(matches!(payloads[1], PacketPayload::ReasoningDelta { .. }));
        assert!(matches!(payloads[2], PacketPayload::ReasoningDone));
        assert!(matches!(payloads[3], PacketPayload::MessageStart));

        // Reasoning is section 0, message section 1, stop carries 1.
        assert_eq!(packets[0].section, 0);
        assert_eq!(packets[3].section, 1);
        assert_eq!(packets.last().unwrap().section, 1);
    }

    #[tokio::test]
    async fn tool_section_carries_start_and_end() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.tool_start("call_1", "doc_search").await;
        emitter.tool_delta("2 results").await;
        emitter.end_section().await;
        drop(emitter);

        let packets = drain(rx).await;
        assert!(matches!(
            &packets[0].payload,
            PacketPayload::ToolStart { call_id, tool_name }
                if call_id == "call_1" && tool_name == "doc_search"
        ));
        assert!(matches!(packets[1].payload, PacketPayload::ToolDelta { .. }));
        assert!(matches!(packets[2].payload, PacketPayload::SectionEnd));
    }

    #[tokio::test]
    async fn switching_kind_closes_previous_section() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.message_delta("looking").await;
        emitter.tool_start("call_1", "fetch").await;
        emitter.end_section().await;
        emitter.message_delta("done").await;
        emitter.stop(FinishReason::Stop).await;
        drop(emitter);

        let packets = drain(rx).await;
        // message(0) closed, tool(1) framed, message(2) framed, stop at 2.
        let ends: Vec<u32> = packets
            .iter()
            .filter(|p| matches!(p.payload, PacketPayload::SectionEnd))
            .map(|p| p.section)
            .collect();
        assert_eq!(ends, vec![0, 1, 2]);
        assert_eq!(packets.last().unwrap().section, 2);
    }

    #[tokio::test]
    async fn empty_deltas_do_not_open_sections() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.message_delta("").await;
        emitter.reasoning_delta("").await;
        emitter.stop(FinishReason::Stop).await;
        drop(emitter);

        let packets = drain(rx).await;
        assert_eq!(packets.len(), 1);
        assert!(matches!(packets[0].payload, PacketPayload::Stop { .. }));
        assert_eq!(packets[0].section, 0);
    }

    #[tokio::test]
    async fn citation_info_lands_between_end_and_stop() {
        let (tx, rx) = mpsc::channel(16);
        let mut emitter = PacketEmitter::new(tx);
        emitter.message_delta("see [1]").await;
        emitter
            .citation_info(vec![CitationEntry {
                number: 1,
                document_unique_id: "doc-a".into(),
            }])
            .await;
        emitter.stop(FinishReason::Stop).await;
        drop(emitter);

        let packets = drain(rx).await;
        let payloads: Vec<&PacketPayload> = packets.iter().map(|p| &p.payload).collect();
        assert!(matches!(payloads[2], PacketPayload::SectionEnd));
        assert!(matches!(payloads[3], PacketPayload::CitationInfo { .. }));
        assert!(matches!(payloads[4], PacketPayload::Stop { .. }));
        // citation_info and stop reuse the message section's index.
        assert_eq!(packets[3].section, 0);
        assert_eq!(packets[4].section, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut emitter = PacketEmitter::new(tx);
        emitter.message_delta("into the void").await;
        emitter.stop(FinishReason::Stop).await;
    }
}
