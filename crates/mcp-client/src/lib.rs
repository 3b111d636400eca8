//! `tern-mcp` — Model Context Protocol client.
//!
//! Layout, bottom up:
//! - [`protocol`]: the JSON-RPC envelope and MCP payload types.
//! - [`transport`]: child processes spoken to over stdin/stdout, one
//!   newline-delimited frame per message.
//! - [`manager`]: per-server connections plus the [`McpManager`] facade
//!   that initializes, routes, and shuts them down.
//! - [`bridge`]: adapts discovered MCP tools to the shared tool registry
//!   under `mcp:{server_id}:{tool_name}` names.
//!
//! ```rust,ignore
//! let manager = Arc::new(McpManager::connect_all(&config.mcp).await);
//! for tool in mcp_tools(&manager) {
//!     registry.register(tool);
//! }
//! ```

pub mod bridge;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use bridge::mcp_tools;
pub use manager::{McpError, McpManager};
pub use protocol::RemoteToolDef;
