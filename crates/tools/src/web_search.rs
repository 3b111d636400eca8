//! Web search against a SearxNG-compatible JSON endpoint.
//!
//! The tool is only registered when `tools.web_search.base_url` is set.
//! Each result becomes a citable document keyed by its normalized URL, so
//! the same page found by two queries (or two turns) keeps one identity.

use serde::Deserialize;
use serde_json::Value;
use tern_domain::config::WebSearchConfig;
use tern_domain::document::{normalize_url, DocumentRef};
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;
use tracing::debug;

use crate::{extract_queries, Tool, ToolContext, ToolOutput};

pub struct WebSearchTool {
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl WebSearchTool {
    /// Returns `None` when no search endpoint is configured.
    pub fn from_config(config: &WebSearchConfig) -> Result<Option<Self>> {
        let Some(base_url) = &config.base_url else {
            return Ok(None);
        };
        let api_key = config
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty());
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| Error::tool("web_search", e.to_string()))?;
        Ok(Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_results: config.max_results,
            client,
        }))
    }

    async fn search_one(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = format!("{}/search", self.base_url);
        let mut req = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")]);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::tool("web_search", e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::tool(
                "web_search",
                format!("search endpoint returned HTTP {status}"),
            ));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::tool("web_search", format!("bad search response: {e}")))?;
        Ok(parsed.results)
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".into(),
            description: "Search the web. Returns result pages as numbered sources with short snippets.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "queries": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "One or more search queries"
                    }
                },
                "required": ["queries"]
            }),
        }
    }

    fn mergeable(&self) -> bool {
        true
    }

    async fn run(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let queries = extract_queries(&arguments);
        if queries.is_empty() {
            return Err(Error::tool("web_search", "no queries given"));
        }

        let mut documents: Vec<DocumentRef> = Vec::new();
        for query in &queries {
            let results = self.search_one(query).await?;
            debug!(query = %query, results = results.len(), "web search");
            for result in results.into_iter().take(self.max_results) {
                let unique_id = normalize_url(&result.url);
                if documents.iter().any(|d| d.unique_id == unique_id) {
                    continue;
                }
                let title = if result.title.is_empty() {
                    result.url.clone()
                } else {
                    result.title
                };
                documents.push(DocumentRef {
                    unique_id,
                    title,
                    url: Some(result.url),
                    excerpt: result.content,
                    metadata: Default::default(),
                });
            }
        }

        let summary = if documents.is_empty() {
            format!("No results for {} query(ies).", queries.len())
        } else {
            format!(
                "{} result(s) across {} query(ies).",
                documents.len(),
                queries.len()
            )
        };
        Ok(ToolOutput { summary, documents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_base_url_yields_none() {
        let config = WebSearchConfig::default();
        assert!(WebSearchTool::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn configured_base_url_is_trimmed() {
        let config = WebSearchConfig {
            base_url: Some("http://localhost:8888/".into()),
            ..Default::default()
        };
        let tool = WebSearchTool::from_config(&config).unwrap().unwrap();
        assert_eq!(tool.base_url, "http://localhost:8888");
    }

    #[test]
    fn response_shape_parses_with_missing_fields() {
        let parsed: SearchResponse = serde_json::from_value(serde_json::json!({
            "results": [
                {"url": "https://example.com/a", "title": "A", "content": "snippet"},
                {"url": "https://example.com/b"}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[1].title, "");
    }
}
