//! Common error type shared across all Tern crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error ({transport}): {message}")]
    Transport { transport: String, message: String },

    #[error("tool error ({tool}): {message}")]
    Tool { tool: String, message: String },

    /// A citation ledger invariant was violated. This indicates a bug in
    /// the dispatcher, never a recoverable runtime condition.
    #[error("citation ledger violation: {0}")]
    Citation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for transport failures.
    pub fn transport(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: message.into(),
        }
    }

    /// Shorthand for tool failures.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
