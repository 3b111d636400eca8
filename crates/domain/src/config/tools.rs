use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Built-in tool configuration — the `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub doc_search: DocSearchConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub http: HttpToolConfig,
}

/// Local corpus search over plain-text / markdown files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSearchConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Directory scanned (recursively) for `.md` and `.txt` files.
    #[serde(default = "d_corpus_dir")]
    pub corpus_dir: PathBuf,
    /// Documents returned per query.
    #[serde(default = "d_top_k")]
    pub top_k: usize,
    /// Excerpt length per returned document.
    #[serde(default = "d_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for DocSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            corpus_dir: d_corpus_dir(),
            top_k: d_top_k(),
            excerpt_chars: d_excerpt_chars(),
        }
    }
}

/// Web search through a SearxNG-compatible endpoint.
///
/// The tool is registered only when `base_url` is set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebSearchConfig {
    /// SearxNG instance, e.g. `http://localhost:8888`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding an API key, for instances that need one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_max_results")]
    pub max_results: usize,
}

/// URL fetching with HTML-to-text conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Response bodies larger than this are truncated before conversion.
    #[serde(default = "d_fetch_max_bytes")]
    pub max_bytes: usize,
    /// Extracted text longer than this is truncated.
    #[serde(default = "d_fetch_max_chars")]
    pub max_text_chars: usize,
    #[serde(default = "d_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: d_fetch_max_bytes(),
            max_text_chars: d_fetch_max_chars(),
            timeout_secs: d_fetch_timeout(),
        }
    }
}

/// Shell command execution.  Disabled unless explicitly enabled — commands
/// run with the server's privileges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_exec_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_output_chars")]
    pub max_output_chars: usize,
    /// Regex patterns refused before spawning.  Matched against the whole
    /// command string.
    #[serde(default = "d_exec_denylist")]
    pub denied_patterns: Vec<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: d_exec_timeout(),
            max_output_chars: d_output_chars(),
            denied_patterns: d_exec_denylist(),
        }
    }
}

/// Raw HTTP requests against an explicit host allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Hosts requests may target.  Exact match against the URL host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "d_output_chars")]
    pub max_response_chars: usize,
    #[serde(default = "d_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpToolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_hosts: Vec::new(),
            max_response_chars: d_output_chars(),
            timeout_secs: d_fetch_timeout(),
        }
    }
}

// ── serde defaults ────────────────────────────────────────────────────

fn d_enabled() -> bool {
    true
}
fn d_corpus_dir() -> PathBuf {
    PathBuf::from("./corpus")
}
fn d_top_k() -> usize {
    5
}
fn d_excerpt_chars() -> usize {
    700
}
fn d_max_results() -> usize {
    5
}
fn d_fetch_max_bytes() -> usize {
    2_000_000
}
fn d_fetch_max_chars() -> usize {
    12_000
}
fn d_fetch_timeout() -> u64 {
    20
}
fn d_exec_timeout() -> u64 {
    30
}
fn d_output_chars() -> usize {
    16_000
}
fn d_exec_denylist() -> Vec<String> {
    vec![
        r"rm\s+(-[a-zA-Z]*\s+)*(/|~)(\s|$)".into(),
        r"\bmkfs\b".into(),
        r"\bdd\s+if=".into(),
        r":\(\)\s*\{".into(),
        r"\b(shutdown|reboot|halt)\b".into(),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_is_disabled_by_default() {
        let cfg = ToolsConfig::default();
        assert!(!cfg.exec.enabled);
        assert!(!cfg.exec.denied_patterns.is_empty());
    }

    #[test]
    fn web_search_is_off_without_base_url() {
        let cfg = WebSearchConfig::default();
        assert!(cfg.base_url.is_none());
        assert_eq!(cfg.max_results, 5);
    }

    #[test]
    fn fetch_defaults() {
        let cfg = FetchConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.max_bytes, 2_000_000);
        assert_eq!(cfg.max_text_chars, 12_000);
    }

    #[test]
    fn tools_section_parses_nested_tables() {
        let toml_str = r#"
            [doc_search]
            corpus_dir = "/srv/docs"
            top_k = 3

            [web_search]
            base_url = "http://localhost:8888"

            [exec]
            enabled = true
            timeout_secs = 5
        "#;
        let cfg: ToolsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.doc_search.corpus_dir, PathBuf::from("/srv/docs"));
        assert_eq!(cfg.doc_search.top_k, 3);
        assert_eq!(cfg.web_search.base_url.as_deref(), Some("http://localhost:8888"));
        assert!(cfg.exec.enabled);
        assert_eq!(cfg.exec.timeout_secs, 5);
        // Unset sections keep defaults.
        assert!(cfg.fetch.enabled);
        assert!(!cfg.http.enabled);
    }
}
