//! The `[mcp]` section: external tool servers.
//!
//! Only the deserialization shapes live here; spawning and speaking the
//! protocol is the `tern-mcp` crate's job.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// One stdio-spawned MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Namespace for the server's tools; a tool surfaces as `mcp:{id}:{tool}`.
    pub id: String,

    /// Executable to spawn, e.g. `"npx"`.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}
