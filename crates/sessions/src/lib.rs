//! Session persistence for Tern.
//!
//! A session is a sequence of turns. The registry (`sessions.json`) tracks
//! one entry per session with title, counters, and timestamps; each session
//! additionally gets an append-only JSONL turn log holding the full turn
//! records, including citation maps.

pub mod store;
pub mod turns;

pub use store::{SessionEntry, SessionStore};
pub use turns::{CitationRecord, TurnLog, TurnRecord};
