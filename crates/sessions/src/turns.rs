//! Append-only JSONL turn logs.
//!
//! Every session owns a `<sessionId>.jsonl` file under the sessions
//! directory, one completed turn per line. Saving is idempotent on
//! `(session_id, turn_index)`: retrying a save after a partial failure
//! appends nothing.
//!
//! A write-through cache keeps each log in memory after the first read,
//! and async wrappers keep file I/O off the tokio runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tern_domain::document::DocumentRef;
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolInvocation;
use tern_domain::stream::Usage;

/// One assigned citation: the 1-based number and the document it refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationRecord {
    pub number: u32,
    pub document: DocumentRef,
}

/// A completed turn as persisted to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u64,
    pub created_at: DateTime<Utc>,
    pub user_message: String,
    pub assistant_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool invocations executed during the turn, post-merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    pub citations: Vec<CitationRecord>,
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Append-only turn log with a write-through cache. Reads hit disk once
/// per session; everything after that is served from memory.
pub struct TurnLog {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<TurnRecord>>>,
}

impl TurnLog {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Append a turn record (sync). Returns `false` when a record with the
    /// same turn index already exists, in which case nothing is written.
    pub fn save_turn(&self, session_id: &str, record: &TurnRecord) -> Result<bool> {
        let existing = self.read(session_id)?;
        if has_index(&existing, record.turn_index) {
            log_duplicate(session_id, record.turn_index);
            return Ok(false);
        }

        // Disk first; the cache only learns about records that landed.
        append_raw(&self.log_path(session_id), &encode_record(record)?)?;
        self.push_cached(session_id, record.clone());
        Ok(true)
    }

    /// Append a turn record without blocking the tokio runtime.
    pub async fn save_turn_async(&self, session_id: &str, record: &TurnRecord) -> Result<bool> {
        self.warm_cache(session_id).await?;

        let duplicate = self
            .cache
            .read()
            .get(session_id)
            .is_some_and(|rs| has_index(rs, record.turn_index));
        if duplicate {
            log_duplicate(session_id, record.turn_index);
            return Ok(false);
        }

        let path = self.log_path(session_id);
        let line = encode_record(record)?;
        run_blocking(move || append_raw(&path, &line)).await?;

        self.push_cached(session_id, record.clone());
        Ok(true)
    }

    /// All records for a session, cached after the first disk read.
    pub fn read(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        if let Some(records) = self.cache.read().get(session_id) {
            return Ok(records.clone());
        }

        let records = load_log(&self.log_path(session_id), session_id)?;
        self.cache
            .write()
            .insert(session_id.to_owned(), records.clone());
        Ok(records)
    }

    /// The last `max_turns` records in turn order.
    pub fn load_history(&self, session_id: &str, max_turns: usize) -> Result<Vec<TurnRecord>> {
        let mut records = self.read(session_id)?;
        records.sort_by_key(|r| r.turn_index);
        let cut = records.len().saturating_sub(max_turns);
        Ok(records.split_off(cut))
    }

    /// Index for the next turn: one past the highest saved index.
    pub fn next_turn_index(&self, session_id: &str) -> Result<u64> {
        let records = self.read(session_id)?;
        Ok(records
            .iter()
            .map(|r| r.turn_index)
            .max()
            .map_or(0, |highest| highest + 1))
    }

    // ── Private helpers ───────────────────────────────────────────────

    fn log_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    fn push_cached(&self, session_id: &str, record: TurnRecord) {
        self.cache
            .write()
            .entry(session_id.to_owned())
            .or_default()
            .push(record);
    }

    /// Load a cold session's log off the runtime so the duplicate check
    /// sees disk state.
    async fn warm_cache(&self, session_id: &str) -> Result<()> {
        if self.cache.read().contains_key(session_id) {
            return Ok(());
        }
        let path = self.log_path(session_id);
        let sid = session_id.to_owned();
        let records = run_blocking(move || load_log(&path, &sid)).await?;
        self.cache.write().insert(session_id.to_owned(), records);
        Ok(())
    }
}

fn has_index(records: &[TurnRecord], turn_index: u64) -> bool {
    records.iter().any(|r| r.turn_index == turn_index)
}

fn log_duplicate(session_id: &str, turn_index: u64) {
    tracing::debug!(session_id, turn_index, "turn already saved, skipping");
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Other(format!("blocking task join: {e}")))?
}

fn encode_record(record: &TurnRecord) -> Result<String> {
    let json = serde_json::to_string(record)
        .map_err(|e| Error::Other(format!("encoding turn record: {e}")))?;
    Ok(format!("{json}\n"))
}

fn append_raw(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(line.as_bytes()).map_err(Error::Io)
}

/// Parse a JSONL turn log. A missing file is an empty log; malformed
/// lines are dropped with a warning rather than poisoning the session.
fn load_log(path: &Path, session_id: &str) -> Result<Vec<TurnRecord>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TurnRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                session_id,
                line = lineno + 1,
                error = %e,
                "dropping malformed turn log line"
            ),
        }
    }
    Ok(records)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn record(turn_index: u64) -> TurnRecord {
        TurnRecord {
            turn_index,
            created_at: Utc::now(),
            user_message: format!("question {turn_index}"),
            assistant_message: format!("answer {turn_index}"),
            reasoning: None,
            tool_calls: Vec::new(),
            citations: vec![CitationRecord {
                number: 1,
                document: DocumentRef::web("https://example.com", "Example", ""),
            }],
            finish_reason: "stop".into(),
            usage: None,
        }
    }

    #[test]
    fn saved_turn_reads_back_with_citations() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());

        assert!(log.save_turn("s1", &record(0)).unwrap());
        let records = log.read("s1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].citations[0].number, 1);
    }

    #[test]
    fn second_save_of_the_same_index_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());

        assert!(log.save_turn("s1", &record(0)).unwrap());
        assert!(!log.save_turn("s1", &record(0)).unwrap());
        assert_eq!(log.read("s1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn async_save_dedupes_across_cold_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = TurnLog::new(dir.path());
            assert!(log.save_turn_async("s1", &record(0)).await.unwrap());
        }

        // A fresh instance has an empty cache and must consult disk.
        let log = TurnLog::new(dir.path());
        assert!(!log.save_turn_async("s1", &record(0)).await.unwrap());
        assert_eq!(log.read("s1").unwrap().len(), 1);
    }

    #[test]
    fn history_trims_to_the_most_recent_turns() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());
        for i in 0..5 {
            log.save_turn("s1", &record(i)).unwrap();
        }

        let history = log.load_history("s1", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].turn_index, 3);
        assert_eq!(history[1].turn_index, 4);
    }

    #[test]
    fn short_history_comes_back_whole() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());
        log.save_turn("s1", &record(0)).unwrap();

        assert_eq!(log.load_history("s1", 10).unwrap().len(), 1);
    }

    #[test]
    fn next_index_is_one_past_the_highest() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());
        assert_eq!(log.next_turn_index("s1").unwrap(), 0);

        log.save_turn("s1", &record(0)).unwrap();
        log.save_turn("s1", &record(1)).unwrap();
        assert_eq!(log.next_turn_index("s1").unwrap(), 2);
    }

    #[test]
    fn malformed_lines_do_not_poison_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = TurnLog::new(dir.path());
        log.save_turn("s1", &record(0)).unwrap();

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("s1.jsonl"))
            .unwrap();
        writeln!(file, "not json").unwrap();

        let fresh = TurnLog::new(dir.path());
        assert_eq!(fresh.read("s1").unwrap().len(), 1);
    }
}
