use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Absent by default, which disables rate limiting entirely. That
    /// suits local use; deployments facing other people's traffic
    /// should set it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// When set, the PID lands in this file on startup under an `fs2`
    /// exclusive lock, so a second instance refuses to start.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            rate_limit: None,
            pid_file: None,
        }
    }
}

/// Token-bucket limits applied per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained rate; the bucket refills one token per
    /// `1 / requests_per_second` seconds.
    pub requests_per_second: u64,
    /// Bucket capacity. Requests beyond this in a burst get 429s until
    /// tokens return.
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins the browser API is open to. Localhost-only unless
    /// configured otherwise; `["*"]` opens it to everyone.
    #[serde(default = "d_local_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_local_origins(),
        }
    }
}

// ── serde defaults ──────────────────────────────────────────────────

fn d_port() -> u16 {
    4810
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_local_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_table_falls_back_to_local_defaults() {
        let parsed: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.port, 4810);
        assert_eq!(parsed.host, "127.0.0.1");
        assert!(parsed.rate_limit.is_none());
        assert!(parsed.pid_file.is_none());
    }

    #[test]
    fn host_and_port_override() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            port = 9000
            host = "0.0.0.0"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.host, "0.0.0.0");
        assert!(parsed.rate_limit.is_none());
    }

    #[test]
    fn rate_limit_table_parses() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            [rate_limit]
            requests_per_second = 25
            burst_size = 40
            "#,
        )
        .unwrap();
        let rl = cfg.rate_limit.expect("rate_limit table present");
        assert_eq!(rl.requests_per_second, 25);
        assert_eq!(rl.burst_size, 40);
    }

    #[test]
    fn cors_defaults_stay_on_loopback() {
        let cors = CorsConfig::default();
        assert_eq!(cors.allowed_origins.len(), 2);
        assert!(cors
            .allowed_origins
            .iter()
            .all(|o| o.contains("localhost") || o.contains("127.0.0.1")));
    }

    #[test]
    fn rate_limit_survives_reserialization() {
        let rl = RateLimitConfig {
            requests_per_second: 8,
            burst_size: 16,
        };
        let text = toml::to_string(&rl).unwrap();
        let back: RateLimitConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.requests_per_second, 8);
        assert_eq!(back.burst_size, 16);
    }
}
