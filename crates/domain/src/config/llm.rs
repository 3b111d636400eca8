use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM transports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model transport configuration — the `[llm]` section.
///
/// Each entry in `transports` describes one upstream model endpoint.
/// Requests that do not name a transport use `default_transport`, or the
/// first configured entry when that is unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub transports: Vec<TransportConfig>,
    /// Id of the transport used when a request does not name one.
    #[serde(default)]
    pub default_transport: Option<String>,
}

/// One upstream model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    /// Unique id, referenced by `default_transport` and per-request overrides.
    pub id: String,
    #[serde(default)]
    pub kind: TransportKind,
    /// Base URL override.  When unset, the adapter's well-known default is used.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.  When unset, the adapter's
    /// conventional variable is read instead.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model identifier sent upstream, e.g. `gpt-4o` or `claude-sonnet-4-0`.
    pub model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl TransportConfig {
    /// Environment variable this transport reads its API key from.
    pub fn api_key_env(&self) -> &str {
        match &self.api_key_env {
            Some(name) => name,
            None => self.kind.default_api_key_env(),
        }
    }
}

/// Wire protocol spoken by a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// OpenAI-compatible `/chat/completions` (OpenAI, vLLM, Ollama, ...).
    #[default]
    OpenaiCompat,
    /// Anthropic Messages API.
    Anthropic,
}

impl TransportKind {
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            TransportKind::OpenaiCompat => "OPENAI_API_KEY",
            TransportKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

fn d_max_tokens() -> u32 {
    4096
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_with_minimal_fields() {
        let toml_str = r#"
            id = "main"
            model = "gpt-4o"
        "#;
        let cfg: TransportConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.id, "main");
        assert_eq!(cfg.kind, TransportKind::OpenaiCompat);
        assert_eq!(cfg.max_tokens, 4096);
        assert!(cfg.base_url.is_none());
    }

    #[test]
    fn anthropic_kind_parses_from_snake_case() {
        let toml_str = r#"
            id = "claude"
            kind = "anthropic"
            model = "claude-sonnet-4-0"
        "#;
        let cfg: TransportConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.kind, TransportKind::Anthropic);
    }

    #[test]
    fn api_key_env_falls_back_to_kind_default() {
        let openai = TransportConfig {
            id: "a".into(),
            model: "m".into(),
            ..Default::default()
        };
        assert_eq!(openai.api_key_env(), "OPENAI_API_KEY");

        let anthropic = TransportConfig {
            id: "b".into(),
            kind: TransportKind::Anthropic,
            model: "m".into(),
            api_key_env: Some("MY_KEY".into()),
            ..Default::default()
        };
        assert_eq!(anthropic.api_key_env(), "MY_KEY");
    }

    #[test]
    fn llm_section_parses_transport_list() {
        let toml_str = r#"
            default_transport = "fast"

            [[transports]]
            id = "fast"
            model = "gpt-4o-mini"

            [[transports]]
            id = "deep"
            kind = "anthropic"
            model = "claude-opus-4-1"
            max_tokens = 8192
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.transports.len(), 2);
        assert_eq!(cfg.default_transport.as_deref(), Some("fast"));
        assert_eq!(cfg.transports[1].max_tokens, 8192);
    }
}
