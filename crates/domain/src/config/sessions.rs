use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `[sessions]` section: where conversation state lands on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding `sessions.json` and the per-session turn logs.
    /// Created on startup when missing.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,

    /// How many completed turns are replayed into the prompt of the next one.
    #[serde(default = "d_history_turns")]
    pub max_history_turns: usize,

    /// Length of the first-message preview shown in session listings.
    #[serde(default = "d_preview_chars")]
    pub preview_chars: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            max_history_turns: d_history_turns(),
            preview_chars: d_preview_chars(),
        }
    }
}

// ── serde defaults ──────────────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./state")
}
fn d_history_turns() -> usize {
    20
}
fn d_preview_chars() -> usize {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_state_dir() {
        let cfg = SessionsConfig::default();
        assert_eq!(cfg.state_path, PathBuf::from("./state"));
        assert_eq!(cfg.max_history_turns, 20);
        assert_eq!(cfg.preview_chars, 120);
    }

    #[test]
    fn overridden_fields_parse_and_the_rest_default() {
        let cfg: SessionsConfig = toml::from_str(
            r#"
            state_path = "/var/lib/tern"
            max_history_turns = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.state_path, PathBuf::from("/var/lib/tern"));
        assert_eq!(cfg.max_history_turns, 8);
        assert_eq!(cfg.preview_chars, 120);
    }
}
