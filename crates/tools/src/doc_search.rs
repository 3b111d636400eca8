//! Local corpus search.
//!
//! Scans a directory of markdown / plain-text files, splits each file into
//! paragraph chunks, and matches queries with AND semantics: a chunk matches
//! a query only when every query token appears in it.  Each returned chunk
//! is a citable document with a stable `doc:{path}#{chunk}` unique id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tern_domain::config::DocSearchConfig;
use tern_domain::document::DocumentRef;
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;

use crate::{extract_queries, Tool, ToolContext, ToolOutput};

pub struct DocSearchTool {
    corpus_dir: PathBuf,
    top_k: usize,
    excerpt_chars: usize,
}

impl DocSearchTool {
    pub fn new(config: &DocSearchConfig) -> Self {
        Self {
            corpus_dir: config.corpus_dir.clone(),
            top_k: config.top_k,
            excerpt_chars: config.excerpt_chars,
        }
    }

    /// Walk the corpus, returning one entry per chunk.
    fn scan(&self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut files = Vec::new();
        collect_files(&self.corpus_dir, &mut files);
        files.sort();

        for path in files {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let rel = path
                .strip_prefix(&self.corpus_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let pieces = split_chunks(&content, self.excerpt_chars);
            let total = pieces.len();
            for (idx, text) in pieces.into_iter().enumerate() {
                chunks.push(Chunk {
                    unique_id: format!("doc:{rel}#{idx}"),
                    title: chunk_title(&rel, idx, total),
                    rel_path: rel.clone(),
                    index: idx,
                    tokens: tokenize(&text),
                    text,
                });
            }
        }
        chunks
    }
}

struct Chunk {
    unique_id: String,
    title: String,
    rel_path: String,
    index: usize,
    text: String,
    tokens: Vec<String>,
}

impl Chunk {
    /// AND semantics: every query token must appear.
    fn matches(&self, query_tokens: &[String]) -> bool {
        !query_tokens.is_empty() && query_tokens.iter().all(|t| self.tokens.contains(t))
    }

    /// Term-frequency score used for ranking within one query.
    fn frequency(&self, query_tokens: &[String]) -> usize {
        self.tokens
            .iter()
            .filter(|t| query_tokens.contains(t))
            .count()
    }

    fn to_document(&self, excerpt_chars: usize) -> DocumentRef {
        let mut metadata = BTreeMap::new();
        metadata.insert("path".to_string(), self.rel_path.clone());
        metadata.insert("chunk".to_string(), self.index.to_string());
        DocumentRef {
            unique_id: self.unique_id.clone(),
            title: self.title.clone(),
            url: None,
            excerpt: truncate_chars(&self.text, excerpt_chars),
            metadata,
        }
    }
}

#[async_trait::async_trait]
impl Tool for DocSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "doc_search".into(),
            description: "Search the local document corpus. Returns matching passages as numbered sources.".into(),
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
            return Err(Error::tool("doc_search", "no queries given"));
        }

        let chunks = self.scan();
        let mut documents: Vec<DocumentRef> = Vec::new();

        for query in &queries {
            let query_tokens = tokenize(query);
            let mut hits: Vec<&Chunk> = chunks
                .iter()
                .filter(|c| c.matches(&query_tokens))
                .collect();
            hits.sort_by(|a, b| {
                b.frequency(&query_tokens)
                    .cmp(&a.frequency(&query_tokens))
                    .then_with(|| a.unique_id.cmp(&b.unique_id))
            });

            for chunk in hits.into_iter().take(self.top_k) {
                if !documents.iter().any(|d| d.unique_id == chunk.unique_id) {
                    documents.push(chunk.to_document(self.excerpt_chars));
                }
            }
        }

        let summary = if documents.is_empty() {
            format!("No passages matched {} query(ies).", queries.len())
        } else {
            format!(
                "{} passage(s) matched across {} query(ies).",
                documents.len(),
                queries.len()
            )
        };

        Ok(ToolOutput { summary, documents })
    }
}

// ── corpus walking and chunking ─────────────────────────────────────

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("txt")
        ) {
            out.push(path);
        }
    }
}

/// Split into paragraph-aligned chunks of at most `max_chars` (a single
/// oversized paragraph becomes its own chunk).
fn split_chunks(content: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in content.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if !current.is_empty() && current.chars().count() + para.chars().count() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn chunk_title(rel_path: &str, idx: usize, total: usize) -> String {
    let stem = rel_path
        .rsplit('/')
        .next()
        .unwrap_or(rel_path)
        .trim_end_matches(".md")
        .trim_end_matches(".txt");
    if total > 1 {
        format!("{} §{}", stem, idx + 1)
    } else {
        stem.to_string()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
