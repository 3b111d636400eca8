use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `[engine]` section: limits for the streaming turn loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on model rounds within one turn.  When the model is still
    /// requesting tools at this round, the final round runs with tool
    /// dispatch disabled so the turn ends with a plain answer.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,

    /// Maximum number of tool invocations running concurrently in one
    /// dispatch batch.
    #[serde(default = "d_tool_parallelism")]
    pub tool_parallelism: usize,

    /// Per-invocation wall-clock timeout.  A timed-out invocation becomes
    /// an error result for that call only; the batch continues.
    #[serde(default = "d_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Forward model reasoning deltas to the client.  When disabled the
    /// engine consumes reasoning silently and emits no reasoning packets.
    #[serde(default = "d_enabled")]
    pub include_reasoning: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            tool_parallelism: d_tool_parallelism(),
            tool_timeout_secs: d_tool_timeout_secs(),
            include_reasoning: true,
        }
    }
}

// ── serde defaults ──────────────────────────────────────────────────

fn d_max_iterations() -> u32 {
    12
}
fn d_tool_parallelism() -> usize {
    4
}
fn d_tool_timeout_secs() -> u64 {
    60
}
fn d_enabled() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_iterations, 12);
        assert_eq!(cfg.tool_parallelism, 4);
        assert_eq!(cfg.tool_timeout_secs, 60);
        assert!(cfg.include_reasoning);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            max_iterations = 3
            include_reasoning = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_iterations, 3);
        assert!(!cfg.include_reasoning);
        assert_eq!(cfg.tool_parallelism, 4);
    }
}
