//! URL fetch with hard limits on time, size, and output length.
//!
//! HTML responses are reduced to readable text by a small tag-stripping
//! pass; JSON and plain text pass through with a character cap. The
//! fetched page becomes one citable document keyed by its normalized
//! URL, so a page surfaced earlier by `web_search` keeps the same
//! citation number when fetched.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use tern_domain::config::FetchConfig;
use tern_domain::document::{normalize_url, DocumentRef};
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;

use crate::{Tool, ToolContext, ToolOutput};

const EXCERPT_CHARS: usize = 700;
const REDIRECT_HOPS: usize = 5;
const ACCEPTED: &str = "text/html,application/xhtml+xml,application/json,text/plain";

pub struct FetchTool {
    client: reqwest::Client,
    max_bytes: usize,
    max_text_chars: usize,
}

impl FetchTool {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_HOPS))
            .build()
            .map_err(|e| Error::tool("fetch", e.to_string()))?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
            max_text_chars: config.max_text_chars,
        })
    }

    /// Reduce HTML to text without a parser dependency. Tags are
    /// dropped, script and style bodies are muted, closing block tags
    /// become line breaks, and the result is whitespace-collapsed.
    fn html_to_text(&self, html: &str) -> String {
        let mut text = String::new();
        let mut budget = self.max_text_chars;
        let mut muted = false;
        let mut rest = html;

        loop {
            let Some(open) = rest.find('<') else {
                if !muted {
                    push_capped(&mut text, rest, &mut budget);
                }
                break;
            };
            if !muted {
                push_capped(&mut text, &rest[..open], &mut budget);
            }
            if budget == 0 {
                break;
            }

            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('>') else {
                // An unterminated tag swallows the rest of the input.
                break;
            };
            // A stray `<` restarts the tag, so the name is whatever sits
            // between the last `<` and the `>`.
            let body = &after_open[..close];
            let tag = match body.rfind('<') {
                Some(i) => body[i + 1..].to_lowercase(),
                None => body.to_lowercase(),
            };
            rest = &after_open[close + 1..];

            if tag.starts_with("script") {
                muted = true;
            } else if tag.starts_with("/script") {
                muted = false;
            } else if tag.starts_with("style") {
                muted = true;
            } else if tag.starts_with("/style") {
                muted = false;
            }

            match tag.strip_prefix('/') {
                Some(name) if is_block_tag(name) => {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                _ if tag == "br" || tag == "br/" => text.push('\n'),
                _ => {}
            }
        }

        collapse_whitespace(&decode_entities(text))
    }
}

fn is_block_tag(name: &str) -> bool {
    const BLOCK: [&str; 16] = [
        "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "br", "article", "section",
        "header", "footer", "blockquote",
    ];
    BLOCK.contains(&name)
}

fn push_capped(out: &mut String, chunk: &str, budget: &mut usize) {
    let mut taken = 0;
    for ch in chunk.chars().take(*budget) {
        out.push(ch);
        taken += 1;
    }
    *budget -= taken;
}

fn decode_entities(text: String) -> String {
    const ENTITIES: [(&str, &str); 7] = [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&#39;", "'"),
        ("&nbsp;", " "),
    ];
    ENTITIES
        .iter()
        .fold(text, |acc, (entity, plain)| acc.replace(entity, plain))
}

/// Squeeze runs of spaces within lines and runs of blank lines down to
/// one; leading and trailing whitespace goes entirely.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::new();
    let mut blank_run = false;
    for line in text.lines() {
        let mut words = line.split_whitespace();
        match words.next() {
            None => {
                if !blank_run {
                    out.push('\n');
                    blank_run = true;
                }
            }
            Some(first) => {
                out.push_str(first);
                for word in words {
                    out.push(' ');
                    out.push_str(word);
                }
                out.push('\n');
                blank_run = false;
            }
        }
    }
    out.trim().to_owned()
}

fn truncate_chars(s: &str, cap: usize) -> String {
    match s.char_indices().nth(cap) {
        Some((cut, _)) => s[..cut].to_owned(),
        None => s.to_owned(),
    }
}

/// First `<title>` element, if any.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let open = lower.find("<title")?;
    let start = lower[open..].find('>')? + open + 1;
    let end = lower[start..].find("</title")? + start;
    let title = html[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[async_trait::async_trait]
impl Tool for FetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fetch".into(),
            description: "Fetch one URL and return its content. HTML is reduced to readable text; JSON and plain text pass through.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to fetch" },
                    "extract_text": {
                        "type": "boolean",
                        "default": true,
                        "description": "Extract readable text from HTML"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn run(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::tool("fetch", "missing args.url"))?;
        let extract_text = arguments
            .get("extract_text")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, "Tern/1.0")
            .header("Accept", ACCEPTED)
            .send()
            .await
            .map_err(|e| Error::tool("fetch", format!("fetch {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::tool("fetch", format!("HTTP {status} fetching {url}")));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        // The cap applies while streaming, not after; an oversized body
        // never fully lands in memory.
        let mut body_bytes: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::tool("fetch", e.to_string()))?;
            if body_bytes.len() + chunk.len() > self.max_bytes {
                return Err(Error::tool(
                    "fetch",
                    format!("response larger than the {} byte cap", self.max_bytes),
                ));
            }
            body_bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&body_bytes);
        let text = if extract_text && content_type.contains("html") {
            self.html_to_text(&body)
        } else if content_type.contains("json")
            || content_type.contains("text/")
            || content_type.is_empty()
        {
            truncate_chars(&body, self.max_text_chars)
        } else {
            return Err(Error::tool(
                "fetch",
                format!("unsupported content type `{content_type}`"),
            ));
        };

        let unique_id = normalize_url(url);
        let title = if content_type.contains("html") {
            extract_title(&body).unwrap_or_else(|| url.to_owned())
        } else {
            url.to_owned()
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("content_type".to_owned(), content_type);
        metadata.insert("bytes".to_owned(), body_bytes.len().to_string());
        let document = DocumentRef {
            unique_id: unique_id.clone(),
            title,
            url: Some(url.to_owned()),
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            metadata,
        };

        let mut summary = String::new();
        if ctx.cited_number(&unique_id).is_some() {
            summary.push_str("This page already appears in the source list.\n\n");
        }
        summary.push_str(&text);

        Ok(ToolOutput {
            summary,
            documents: vec![document],
        })
    }
}
