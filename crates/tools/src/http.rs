//! Arbitrary HTTP requests against an allowlist of hosts.
//!
//! Disabled by default; even when enabled, requests only go to hosts
//! named exactly in `tools.http.allowed_hosts`.

use std::time::Duration;

use serde_json::Value;
use tern_domain::config::HttpToolConfig;
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;

use crate::{Tool, ToolContext, ToolOutput};

pub struct HttpTool {
    allowed_hosts: Vec<String>,
    max_response_chars: usize,
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new(config: &HttpToolConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::tool("http_request", e.to_string()))?;
        Ok(Self {
            allowed_hosts: config.allowed_hosts.clone(),
            max_response_chars: config.max_response_chars,
            client,
        })
    }

    fn check_host(&self, url: &str) -> Result<reqwest::Url> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::tool("http_request", format!("invalid url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::tool("http_request", "url has no host"))?;
        if !self.allowed_hosts.iter().any(|h| h == host) {
            return Err(Error::tool(
                "http_request",
                format!("host `{host}` is not in the allowlist"),
            ));
        }
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl Tool for HttpTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "http_request".into(),
            description: "Send an HTTP request to an allowlisted host and return the response.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Request URL (host must be allowlisted)" },
                    "method": {
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"],
                        "default": "GET"
                    },
                    "headers": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Extra request headers"
                    },
                    "body": { "type": "string", "description": "Request body (optional)" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn run(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::tool("http_request", "missing args.url"))?;
        let parsed = self.check_host(url)?;

        let method = arguments
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| Error::tool("http_request", format!("unsupported method `{method}`")))?;

        let mut req = self.client.request(method, parsed);
        if let Some(headers) = arguments.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    req = req.header(name, value);
                }
            }
        }
        if let Some(body) = arguments.get("body").and_then(|v| v.as_str()) {
            req = req.body(body.to_string());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::tool("http_request", e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::tool("http_request", e.to_string()))?;

        let mut text: String = body.chars().take(self.max_response_chars).collect();
        if body.chars().count() > self.max_response_chars {
            text.push_str("\n[response truncated]");
        }

        Ok(ToolOutput::text(format!("HTTP {status}\n{text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_with(hosts: &[&str]) -> HttpTool {
        HttpTool::new(&HttpToolConfig {
            enabled: true,
            allowed_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn allowlist_is_exact_match() {
        let t = tool_with(&["api.example.com"]);
        assert!(t.check_host("https://api.example.com/v1/things").is_ok());
        assert!(t.check_host("https://evil.example.com/").is_err());
        // Subdomain of an allowed host is still a different host.
        assert!(t.check_host("https://api.example.com.evil.net/").is_err());
    }

    #[test]
    fn empty_allowlist_rejects_everything() {
        let t = tool_with(&[]);
        assert!(t.check_host("https://example.com/").is_err());
    }

    #[test]
    fn bad_urls_are_rejected() {
        let t = tool_with(&["example.com"]);
        assert!(t.check_host("not a url").is_err());
        assert!(t.check_host("file:///etc/passwd").is_err());
    }
}
