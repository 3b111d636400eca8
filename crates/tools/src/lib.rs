//! Built-in tools for Tern.
//!
//! Every tool implements the [`Tool`] trait: a JSON-schema definition shown
//! to the model, a `mergeable` flag the dispatcher uses to combine duplicate
//! calls within one round, and an async `run` that returns prose for the
//! model plus zero or more citable documents.  Tools never assign citation
//! numbers; they only report documents and may consult the read-only
//! snapshot of what has already been cited.

pub mod doc_search;
pub mod exec;
pub mod fetch;
pub mod http;
pub mod web_search;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tern_domain::config::ToolsConfig;
use tern_domain::document::DocumentRef;
use tern_domain::error::Result;
use tern_domain::message::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-only execution context handed to every tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Number the citation ledger would hand out next at dispatch time.
    /// Informational: a tool knows where its documents' numbering starts,
    /// but final resolution always happens in the dispatcher after join.
    pub citation_start: u32,
    /// Snapshot of citation assignments at dispatch time
    /// (document unique id → citation number).  Immutable: concurrent
    /// invocations all see the same state and none may extend it.
    pub cited: Arc<HashMap<String, u32>>,
}

impl ToolContext {
    pub fn with_citations(citation_start: u32, cited: HashMap<String, u32>) -> Self {
        Self {
            citation_start,
            cited: Arc::new(cited),
        }
    }

    /// Citation number already assigned to a document, if any.
    pub fn cited_number(&self, unique_id: &str) -> Option<u32> {
        self.cited.get(unique_id).copied()
    }
}

/// What a tool hands back to the engine.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Prose result shown to the model (and streamed to the client).
    pub summary: String,
    /// Documents produced by this invocation, in retrieval order.
    /// The dispatcher assigns citation numbers to these after all
    /// invocations of the round have completed.
    pub documents: Vec<DocumentRef>,
}

impl ToolOutput {
    pub fn text(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            documents: Vec::new(),
        }
    }
}

/// Trait every tool implements.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Whether multiple calls to this tool within one round may be merged
    /// into a single invocation by concatenating their query lists.
    fn mergeable(&self) -> bool {
        false
    }

    /// Execute one invocation.
    async fn run(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query extraction (shared with the dispatcher's merge step)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull the query list out of a search-tool argument object.
///
/// Accepts both the canonical `{"queries": [...]}` shape and the singular
/// `{"query": "..."}` many models emit.  Order is preserved; empty strings
/// are dropped.
pub fn extract_queries(arguments: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(arr) = arguments.get("queries").and_then(|v| v.as_array()) {
        for q in arr {
            if let Some(s) = q.as_str() {
                if !s.trim().is_empty() {
                    out.push(s.to_string());
                }
            }
        }
    }
    if let Some(s) = arguments.get("query").and_then(|v| v.as_str()) {
        if !s.trim().is_empty() {
            out.push(s.to_string());
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Name → tool map, built from config at startup.  MCP-backed tools are
/// registered on top by the gateway once their servers respond.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the built-in tools enabled by `config`.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let mut registry = Self::new();

        if config.doc_search.enabled {
            registry.register(Arc::new(doc_search::DocSearchTool::new(
                &config.doc_search,
            )));
        }
        if let Some(tool) = web_search::WebSearchTool::from_config(&config.web_search)? {
            registry.register(Arc::new(tool));
        }
        if config.fetch.enabled {
            registry.register(Arc::new(fetch::FetchTool::new(&config.fetch)?));
        }
        if config.exec.enabled {
            registry.register(Arc::new(exec::ExecTool::new(&config.exec)?));
        }
        if config.http.enabled {
            registry.register(Arc::new(http::HttpTool::new(&config.http)?));
        }

        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name.clone());
        }
        tracing::debug!(tool = %name, "registered tool");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_queries_handles_both_shapes() {
        let canonical = serde_json::json!({"queries": ["a", "b"]});
        assert_eq!(extract_queries(&canonical), vec!["a", "b"]);

        let singular = serde_json::json!({"query": "c"});
        assert_eq!(extract_queries(&singular), vec!["c"]);

        let both = serde_json::json!({"queries": ["a"], "query": "b"});
        assert_eq!(extract_queries(&both), vec!["a", "b"]);
    }

    #[test]
    fn extract_queries_drops_blanks() {
        let args = serde_json::json!({"queries": ["a", "", "  "]});
        assert_eq!(extract_queries(&args), vec!["a"]);
    }

    #[test]
    fn default_config_registers_doc_search_and_fetch() {
        let registry = ToolRegistry::from_config(&ToolsConfig::default()).unwrap();
        assert!(registry.get("doc_search").is_some());
        assert!(registry.get("fetch").is_some());
        // Off by default.
        assert!(registry.get("web_search").is_none());
        assert!(registry.get("exec").is_none());
        assert!(registry.get("http_request").is_none());
    }

    #[test]
    fn definitions_keep_registration_order() {
        let registry = ToolRegistry::from_config(&ToolsConfig::default()).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["doc_search".to_string(), "fetch".to_string()]);
    }

    #[test]
    fn cited_snapshot_lookup() {
        let mut cited = HashMap::new();
        cited.insert("https://a.dev".to_string(), 3u32);
        let ctx = ToolContext::with_citations(4, cited);
        assert_eq!(ctx.citation_start, 4);
        assert_eq!(ctx.cited_number("https://a.dev"), Some(3));
        assert_eq!(ctx.cited_number("https://b.dev"), None);
    }
}
