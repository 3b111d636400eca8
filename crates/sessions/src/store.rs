//! Session registry.
//!
//! One `sessions.json` under the state path holds every [`SessionEntry`]:
//! title, turn count, and token counters keyed by session ID. The turn
//! bodies themselves live in the per-session turn log, never here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tern_domain::error::{Error, Result};
use tern_domain::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Preview of the first user message, set on the first completed turn.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub turns: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl SessionEntry {
    fn fresh(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            updated_at: now,
            title: None,
            turns: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of sessions backed by a JSON file.
pub struct SessionStore {
    sessions_path: PathBuf,
    preview_chars: usize,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Open the registry at `state_path/sessions/sessions.json`, creating
    /// the directory when missing.
    pub fn new(state_path: &Path, preview_chars: usize) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        let sessions_path = dir.join("sessions.json");

        let sessions = load_registry(&sessions_path)?;
        tracing::info!(
            count = sessions.len(),
            file = %sessions_path.display(),
            "session registry ready"
        );

        Ok(Self {
            sessions_path,
            preview_chars,
            sessions: RwLock::new(sessions),
        })
    }

    /// Look up a session by ID.
    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Resolve or create a session. A caller-supplied ID is honored even
    /// when unknown (the entry is created under it); `None` mints a fresh
    /// UUID. Returns `(entry, is_new)`.
    pub fn resolve_or_create(&self, session_id: Option<&str>) -> (SessionEntry, bool) {
        if let Some(id) = session_id {
            if let Some(entry) = self.get(id) {
                return (entry, false);
            }
        }

        let id = match session_id {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let entry = SessionEntry::fresh(id.clone());

        self.sessions.write().insert(id.clone(), entry.clone());
        tracing::debug!(session_id = %id, "session created");
        (entry, true)
    }

    /// Record a completed turn: bump counters, set the title from the first
    /// user message, touch the timestamp.
    pub fn record_turn(&self, session_id: &str, user_message: &str, usage: Option<&Usage>) {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };

        entry.turns += 1;
        entry
            .title
            .get_or_insert_with(|| preview(user_message, self.preview_chars));
        if let Some(usage) = usage {
            entry.input_tokens += u64::from(usage.prompt_tokens);
            entry.output_tokens += u64::from(usage.completion_tokens);
            entry.total_tokens += u64::from(usage.total_tokens);
        }
        entry.updated_at = Utc::now();
    }

    /// List all sessions, most recently updated first.
    pub fn list(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<SessionEntry> = self.sessions.read().values().cloned().collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    /// Persist the registry to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)
            .map_err(|e| Error::Other(format!("encoding session registry: {e}")))?;
        std::fs::write(&self.sessions_path, json).map_err(Error::Io)
    }

    /// Directory holding the per-session turn logs.
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Read the registry file; a missing file is an empty registry, a corrupt
/// one is discarded rather than blocking startup.
fn load_registry(path: &Path) -> Result<HashMap<String, SessionEntry>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session registry unreadable; starting empty");
            HashMap::new()
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Cap `s` at `max` bytes, backing up to a char boundary, with `...`
/// marking the cut.
fn preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let end = (0..=max)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}...", &s[..end])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
