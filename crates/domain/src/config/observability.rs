use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `[observability]` section: OpenTelemetry trace export.
///
/// Out of the box (`otlp_endpoint` unset) the gateway emits structured
/// JSON logs and nothing else. Pointing `otlp_endpoint` at a collector
/// (Jaeger, Grafana Tempo, ...) turns on OTLP/gRPC export, and every
/// `tracing` span is forwarded there as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`. Unset disables
    /// export entirely.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Reported as the `service.name` resource attribute.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Sampling ratio from `0.0` (never) to `1.0` (always). Sampling is
    /// `TraceIdRatioBased`, so one decision covers the whole trace.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

// ── serde defaults ──────────────────────────────────────────────────

fn d_service_name() -> String {
    "tern".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_off_by_default() {
        let defaults = ObservabilityConfig::default();
        assert!(defaults.otlp_endpoint.is_none());
        assert_eq!(defaults.service_name, "tern");
        let drift = (defaults.sample_rate - 1.0).abs();
        assert!(drift < f64::EPSILON);
    }

    #[test]
    fn empty_table_matches_the_default() {
        let parsed: ObservabilityConfig = toml::from_str("").unwrap();
        assert!(parsed.otlp_endpoint.is_none());
        assert_eq!(parsed.service_name, "tern");
    }

    #[test]
    fn endpoint_and_overrides_parse() {
        let cfg: ObservabilityConfig = toml::from_str(
            r#"
            otlp_endpoint = "http://collector:4317"
            service_name = "tern-staging"
            sample_rate = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(cfg.service_name, "tern-staging");
        let drift = (cfg.sample_rate - 0.25).abs();
        assert!(drift < f64::EPSILON);
    }
}
