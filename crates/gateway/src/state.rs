use std::sync::Arc;

use tern_domain::config::Config;
use tern_mcp::McpManager;
use tern_providers::TransportRegistry;
use tern_sessions::{SessionStore, TurnLog};
use tern_tools::ToolRegistry;

use crate::engine::TurnRegistry;

/// Everything a request handler can reach, cloned per request.
///
/// All fields are `Arc`s, so a clone is a handful of refcount bumps.
#[derive(Clone)]
pub struct AppState {
    // ── Wiring ────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub transports: Arc<TransportRegistry>,
    pub tools: Arc<ToolRegistry>,

    // ── Storage ───────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub turn_log: Arc<TurnLog>,

    // ── Live state ────────────────────────────────────────────────────
    /// Running turns and their cancel tokens.
    pub turns: Arc<TurnRegistry>,
    /// MCP server connections. Empty when none are configured.
    pub mcp: Arc<McpManager>,
}
