//! Connection manager for MCP servers.
//!
//! One [`ServerConnection`] per configured entry, each owning its transport and
//! the tool list it advertised at startup. The [`McpManager`] is the only
//! type the rest of the system touches: it initializes everything from
//! config, routes calls by server id, and tears the processes down on
//! shutdown.

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::{methods, InitializeParams, ListToolsResult, RemoteToolDef, ToolCallResult};
use crate::transport::{StdioTransport, TransportError};
use tern_domain::config::{McpConfig, McpServerConfig};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no MCP server named `{0}`")]
    UnknownServer(String),

    #[error("MCP server `{0}` is no longer running")]
    Unavailable(String),
}

impl From<McpError> for tern_domain::error::Error {
    fn from(e: McpError) -> Self {
        tern_domain::error::Error::Other(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServerConnection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live connection to one MCP server.
pub struct ServerConnection {
    pub id: String,
    /// Tool definitions captured once at startup.
    pub tools: Vec<RemoteToolDef>,
    transport: StdioTransport,
}

impl ServerConnection {
    /// Spawn the process and walk the startup sequence: `initialize`,
    /// the `initialized` notification, then tool discovery.
    ///
    /// A failed discovery is tolerated (the server just contributes no
    /// tools); a failed handshake is not.
    async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(config)?;
        handshake(&transport).await?;
        let tools = discover_tools(&transport, &config.id).await?;

        tracing::info!(
            server_id = %config.id,
            tools = tools.len(),
            "MCP server ready"
        );

        Ok(Self {
            id: config.id.clone(),
            tools,
            transport,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Invoke one of this server's tools.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        if !self.is_alive() {
            return Err(McpError::Unavailable(self.id.clone()));
        }

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let raw = self
            .transport
            .send_request(methods::TOOLS_CALL, Some(params))
            .await?
            .into_result()
            .map_err(|e| McpError::Protocol(format!("tools/call rejected: {e}")))?;

        serde_json::from_value(raw)
            .map_err(|e| McpError::Protocol(format!("unreadable tools/call result: {e}")))
    }

    async fn shutdown(&self) {
        tracing::info!(server_id = %self.id, "stopping MCP server");
        self.transport.shutdown().await;
    }
}

async fn handshake(transport: &StdioTransport) -> Result<(), McpError> {
    let params = serde_json::to_value(InitializeParams::new())
        .map_err(|e| McpError::Protocol(format!("handshake params: {e}")))?;

    transport
        .send_request(methods::INITIALIZE, Some(params))
        .await?
        .into_result()
        .map_err(|e| McpError::Protocol(format!("initialize rejected: {e}")))?;

    transport.send_notification(methods::INITIALIZED).await?;
    Ok(())
}

async fn discover_tools(
    transport: &StdioTransport,
    server_id: &str,
) -> Result<Vec<RemoteToolDef>, McpError> {
    let tools = match transport
        .send_request(methods::TOOLS_LIST, None)
        .await?
        .into_result()
    {
        Ok(raw) => serde_json::from_value::<ListToolsResult>(raw)
            .map(|listed| listed.tools)
            .unwrap_or_else(|e| {
                tracing::warn!(server_id, error = %e, "unreadable tools/list payload");
                Vec::new()
            }),
        Err(e) => {
            tracing::warn!(server_id, error = %e, "tools/list rejected, continuing without tools");
            Vec::new()
        }
    };
    Ok(tools)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All MCP connections, keyed by server id.
pub struct McpManager {
    servers: HashMap<String, ServerConnection>,
}

impl McpManager {
    /// A manager with no servers. Used when the `[mcp]` section is absent.
    pub fn disabled() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Bring up every configured server. One bad server never blocks the
    /// rest: its error is logged and the entry is dropped.
    pub async fn connect_all(config: &McpConfig) -> Self {
        let mut servers = HashMap::new();

        for entry in &config.servers {
            tracing::info!(server_id = %entry.id, command = %entry.command, "starting MCP server");
            match ServerConnection::connect(entry).await {
                Ok(server) => {
                    servers.insert(entry.id.clone(), server);
                }
                Err(e) => {
                    tracing::warn!(server_id = %entry.id, error = %e, "MCP server skipped");
                }
            }
        }

        if !servers.is_empty() {
            tracing::info!(count = servers.len(), "MCP manager ready");
        }
        Self { servers }
    }

    /// `(server_id, tool)` pairs for every tool on a still-running server.
    pub fn advertised_tools(&self) -> Vec<(&str, &RemoteToolDef)> {
        self.servers
            .values()
            .filter(|s| s.is_alive())
            .flat_map(|s| s.tools.iter().map(move |t| (s.id.as_str(), t)))
            .collect()
    }

    /// Route a call to the named server.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        match self.servers.get(server_id) {
            Some(server) => server.call_tool(tool_name, arguments).await,
            None => Err(McpError::UnknownServer(server_id.to_owned())),
        }
    }

    pub fn connected_count(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Stop every server, concurrently.
    pub async fn shutdown(&self) {
        futures_util::future::join_all(self.servers.values().map(ServerConnection::shutdown)).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_manager_has_nothing_to_offer() {
        let manager = McpManager::disabled();
        assert!(manager.is_empty());
        assert_eq!(manager.connected_count(), 0);
        assert!(manager.advertised_tools().is_empty());
    }

    #[tokio::test]
    async fn unknown_server_id_is_an_error() {
        let manager = McpManager::disabled();
        let result = manager
            .call_tool("ghost", "whatever", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(McpError::UnknownServer(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn unstartable_server_is_skipped_not_fatal() {
        let config = McpConfig {
            servers: vec![McpServerConfig {
                id: "broken".into(),
                command: "tern-no-such-binary-for-tests".into(),
                args: Vec::new(),
                env: Default::default(),
            }],
        };
        let manager = McpManager::connect_all(&config).await;
        assert!(manager.is_empty());
    }
}
