//! Shared utility functions for transport adapters.

use tern_domain::config::TransportConfig;
use tern_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key for a transport from its configured environment variable.
///
/// A missing variable yields `None`.  Adapters that can talk to
/// unauthenticated endpoints (local Ollama, vLLM) treat `None` as "send no
/// auth header"; adapters whose upstream always requires a key turn it into
/// a config error at construction time.
pub(crate) fn resolve_api_key(cfg: &TransportConfig) -> Option<String> {
    let var = cfg.api_key_env();
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            tracing::debug!(transport = %cfg.id, env_var = %var, "no API key in environment");
            None
        }
    }
}

/// Shared error for non-2xx upstream responses.
pub(crate) fn http_error(transport: &str, status: reqwest::StatusCode, body: &str) -> Error {
    Error::Transport {
        transport: transport.to_string(),
        message: format!("HTTP {} - {}", status.as_u16(), body),
    }
}

/// Borrow a string field off a JSON object, if present and a string.
pub(crate) fn json_str<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key)?.as_str()
}

/// Read an unsigned integer field off a JSON object.
pub(crate) fn json_u64(v: &serde_json::Value, key: &str) -> Option<u64> {
    v.get(key)?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_domain::config::TransportKind;

    #[test]
    fn missing_env_var_resolves_to_none() {
        let cfg = TransportConfig {
            id: "t".into(),
            model: "m".into(),
            api_key_env: Some("TERN_TEST_KEY_THAT_DOES_NOT_EXIST".into()),
            ..Default::default()
        };
        assert!(resolve_api_key(&cfg).is_none());
    }

    #[test]
    fn present_env_var_resolves() {
        std::env::set_var("TERN_TEST_KEY_PRESENT", "sk-abc");
        let cfg = TransportConfig {
            id: "t".into(),
            kind: TransportKind::OpenaiCompat,
            model: "m".into(),
            api_key_env: Some("TERN_TEST_KEY_PRESENT".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("sk-abc"));
    }

    #[test]
    fn http_error_carries_status_and_body() {
        let err = http_error("main", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("slow down"));
    }
}
