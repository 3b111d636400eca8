//! Bridge from discovered MCP tools to the shared [`Tool`] trait.
//!
//! Each MCP tool is registered as `mcp:{server_id}:{tool_name}` so the
//! model sees a flat tool list regardless of which server provides what.
//! MCP tools never contribute citable documents and are never merged.

use std::sync::Arc;

use serde_json::Value;

use crate::manager::McpManager;
use tern_domain::error::{Error, Result};
use tern_domain::message::ToolDefinition;
use tern_tools::{Tool, ToolContext, ToolOutput};

pub struct McpTool {
    server_id: String,
    tool_name: String,
    definition: ToolDefinition,
    manager: Arc<McpManager>,
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn run(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let result = self
            .manager
            .call_tool(&self.server_id, &self.tool_name, arguments)
            .await?;

        // Concatenate text content items; fall back to the raw content list
        // for non-text payloads.
        let text: String = result
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let text = if text.is_empty() {
            serde_json::to_string_pretty(&serde_json::json!({
                "content": result.content.iter().map(|c| {
                    serde_json::json!({ "type": c.kind, "text": c.text })
                }).collect::<Vec<_>>()
            }))
            .unwrap_or_default()
        } else {
            text
        };

        if result.is_error {
            return Err(Error::tool(self.definition.name.clone(), text));
        }
        Ok(ToolOutput::text(text))
    }
}

/// Wrap every tool discovered by the manager for registry registration.
pub fn mcp_tools(manager: &Arc<McpManager>) -> Vec<Arc<dyn Tool>> {
    manager
        .advertised_tools()
        .into_iter()
        .map(|(server_id, def)| {
            Arc::new(McpTool {
                server_id: server_id.to_string(),
                tool_name: def.name.clone(),
                definition: ToolDefinition {
                    name: format!("mcp:{server_id}:{}", def.name),
                    description: def.description.clone(),
                    parameters: def.input_schema.clone(),
                },
                manager: Arc::clone(manager),
            }) as Arc<dyn Tool>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_yields_no_tools() {
        let manager = Arc::new(McpManager::disabled());
        assert!(mcp_tools(&manager).is_empty());
    }
}
