//! Document references surfaced by tools.
//!
//! Every retrievable unit (search hit, fetched page, indexed chunk) carries
//! a unique identifier that is stable across re-fetches within a turn. The
//! citation ledger keys on this identifier, which is how a fetch of a URL
//! that an earlier search already returned reuses that URL's number.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DocumentRef
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A retrievable unit surfaced by a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    /// Stable unique identifier: a normalized URL for web documents, or a
    /// `doc:{path}#{chunk}` composite for indexed corpus chunks.
    pub unique_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Excerpt or extracted content shown to the model.
    #[serde(default)]
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentRef {
    /// A web document keyed by its normalized URL.
    pub fn web(url: &str, title: impl Into<String>, excerpt: impl Into<String>) -> Self {
        let normalized = normalize_url(url);
        Self {
            unique_id: normalized.clone(),
            title: title.into(),
            url: Some(normalized),
            excerpt: excerpt.into(),
            metadata: BTreeMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a URL so the same page always produces the same unique id:
/// lowercase scheme/host, drop the fragment, drop default ports, drop a
/// trailing slash on non-root paths.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();

    // Split off the fragment first; it never changes the resource.
    let url = url.split('#').next().unwrap_or(url);

    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => return url.to_string(),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };

    let mut authority = authority.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => ":80",
        "https" => ":443",
        _ => "",
    };
    if !default_port.is_empty() {
        if let Some(stripped) = authority.strip_suffix(default_port) {
            authority = stripped.to_string();
        }
    }

    let path_and_query = if path_and_query.len() > 1
        && path_and_query.ends_with('/')
        && !path_and_query.contains('?')
    {
        &path_and_query[..path_and_query.len() - 1]
    } else {
        path_and_query
    };

    format!("{scheme}://{authority}{path_and_query}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_fragment() {
        assert_eq!(
            normalize_url("https://example.com/page#section-2"),
            "https://example.com/page"
        );
    }

    #[test]
    fn normalize_drops_default_port() {
        assert_eq!(normalize_url("https://example.com:443/a"), "https://example.com/a");
        assert_eq!(normalize_url("http://example.com:80/a"), "http://example.com/a");
        assert_eq!(
            normalize_url("http://example.com:8080/a"),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn normalize_lowercases_host_not_path() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Page"),
            "https://example.com/Page"
        );
    }

    #[test]
    fn normalize_drops_trailing_slash_on_paths() {
        assert_eq!(normalize_url("https://example.com/docs/"), "https://example.com/docs");
        // Root slash stays.
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn normalize_keeps_query() {
        assert_eq!(
            normalize_url("https://example.com/search?q=rust"),
            "https://example.com/search?q=rust"
        );
    }

    #[test]
    fn same_page_same_unique_id() {
        let a = DocumentRef::web("https://Example.com/page#intro", "A", "");
        let b = DocumentRef::web("https://example.com/page", "B", "");
        assert_eq!(a.unique_id, b.unique_id);
    }
}
