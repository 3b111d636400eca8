//! Transport registry.
//!
//! Builds every configured model transport at startup and answers lookups by
//! id afterwards.  Credentials come from the environment when a transport's
//! config does not carry them, so construction is where missing auth surfaces.

use crate::anthropic::AnthropicTransport;
use crate::openai_compat::OpenAiCompatTransport;
use crate::traits::ModelTransport;
use std::collections::HashMap;
use std::sync::Arc;
use tern_domain::config::{LlmConfig, TransportConfig, TransportKind};
use tern_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TransportRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All instantiated model transports plus the default assignment.
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn ModelTransport>>,
    /// Wins default resolution when set; otherwise the first transport that
    /// came up successfully is the default.
    default_id: Option<String>,
    config_order: Vec<String>,
}

impl TransportRegistry {
    /// Instantiate every `[[llm.transports]]` entry.
    ///
    /// An entry that fails to construct (missing API key, unusable base URL)
    /// is logged and skipped so the rest of the gateway can still boot.  Set
    /// `TERN_REQUIRE_LLM=1` to turn a fully-empty registry into a startup
    /// error instead.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut registry = Self {
            transports: HashMap::new(),
            default_id: config.default_transport.clone(),
            config_order: Vec::new(),
        };

        for entry in &config.transports {
            match build_transport(entry) {
                Ok(transport) => {
                    tracing::info!(
                        transport_id = %entry.id,
                        kind = ?entry.kind,
                        model = %entry.model,
                        "model transport ready"
                    );
                    registry.config_order.push(entry.id.clone());
                    registry.transports.insert(entry.id.clone(), transport);
                }
                Err(e) => tracing::warn!(
                    transport_id = %entry.id,
                    kind = ?entry.kind,
                    error = %e,
                    "skipping model transport that failed to construct"
                ),
            }
        }

        if registry.transports.is_empty() && !config.transports.is_empty() {
            if fail_fast_requested() {
                return Err(Error::Config(
                    "every configured model transport failed to initialize".into(),
                ));
            }
            tracing::warn!(
                "no model transport came up; chat requests will be rejected until credentials are fixed"
            );
        }

        Ok(registry)
    }

    /// Add a transport the embedder constructed itself, keyed by its
    /// [`ModelTransport::transport_id`].  Config-driven startup goes through
    /// [`TransportRegistry::from_config`] instead.
    pub fn register(&mut self, transport: Arc<dyn ModelTransport>) {
        let id = transport.transport_id().to_string();
        if self.transports.insert(id.clone(), transport).is_none() {
            self.config_order.push(id);
        }
    }

    /// Look up a transport by config id.
    pub fn get(&self, transport_id: &str) -> Option<Arc<dyn ModelTransport>> {
        self.transports.get(transport_id).cloned()
    }

    /// The default transport, if any is available.
    pub fn default_transport(&self) -> Option<Arc<dyn ModelTransport>> {
        match &self.default_id {
            Some(id) => self.get(id),
            None => self.config_order.first().and_then(|id| self.get(id)),
        }
    }

    /// Resolve an optional transport id, falling back to the default.
    pub fn resolve(&self, transport_id: Option<&str>) -> Result<Arc<dyn ModelTransport>> {
        match transport_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| Error::Config(format!("unknown transport `{id}`"))),
            None => self
                .default_transport()
                .ok_or_else(|| Error::Config("no model transports configured".into())),
        }
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

// ── Construction helpers ────────────────────────────────────────

fn build_transport(entry: &TransportConfig) -> Result<Arc<dyn ModelTransport>> {
    Ok(match entry.kind {
        TransportKind::Anthropic => Arc::new(AnthropicTransport::from_config(entry)?),
        TransportKind::OpenaiCompat => Arc::new(OpenAiCompatTransport::from_config(entry)?),
    })
}

fn fail_fast_requested() -> bool {
    std::env::var("TERN_REQUIRE_LLM").is_ok_and(|v| ["1", "true", "yes"].contains(&v.as_str()))
}
