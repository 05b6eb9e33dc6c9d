//! Tool protocol abstraction.
//!
//! Agents reach their tools through a [`ToolRegistry`], which can hold
//! several [`ToolProtocol`]s at once (local Rust functions and remote
//! OpenAPI services in the same agent, for instance). The registry maps each
//! discovered tool name to the protocol that owns it; the turn controller
//! never looks inside — tool invocation is an agent-internal concern.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Error box shared by tool calls.
pub type ToolError = Box<dyn Error + Send + Sync>;

/// Describes one callable tool.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolMetadata {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        ToolResult {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// A source of tools: local functions, a remote OpenAPI service, anything
/// that can list and execute named operations.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolResult, ToolError>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError>;

    fn protocol_name(&self) -> &str;
}

/// Routes tool calls to the protocol that owns each tool name.
#[derive(Default)]
pub struct ToolRegistry {
    protocols: Vec<Arc<dyn ToolProtocol>>,
    // tool name -> index into `protocols`
    routes: HashMap<String, usize>,
    metadata: Vec<ToolMetadata>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        ToolRegistry::default()
    }

    /// Register a protocol and discover its tools. Later registrations do
    /// not shadow earlier tool names.
    pub async fn add_protocol(&mut self, protocol: Arc<dyn ToolProtocol>) -> Result<(), ToolError> {
        let tools = protocol.list_tools().await?;
        let index = self.protocols.len();
        self.protocols.push(protocol);
        for tool in tools {
            if self.routes.contains_key(&tool.name) {
                log::warn!(
                    "Tool '{}' already registered; keeping the earlier binding",
                    tool.name
                );
                continue;
            }
            self.routes.insert(tool.name.clone(), index);
            self.metadata.push(tool);
        }
        Ok(())
    }

    pub async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolResult, ToolError> {
        match self.routes.get(tool_name) {
            Some(&index) => self.protocols[index].execute(tool_name, parameters).await,
            None => Ok(ToolResult::failure(format!("Unknown tool: {}", tool_name))),
        }
    }

    pub fn list_tools(&self) -> &[ToolMetadata] {
        &self.metadata
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Render the tool roster and calling convention for an agent's system
    /// prompt.
    pub fn render_tool_help(&self) -> String {
        let mut help = String::from("\n\nYou have access to the following tools:\n");
        for tool in &self.metadata {
            help.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        help.push_str(
            "\nTo use a tool, respond with a JSON object in the following format:\n\
             {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
             After tool execution, I'll provide the result and you can continue.\n",
        );
        help
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticProtocol {
        name: &'static str,
        tools: Vec<ToolMetadata>,
    }

    #[async_trait]
    impl ToolProtocol for StaticProtocol {
        async fn execute(&self, tool_name: &str, _parameters: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(json!({ "ran": tool_name })))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
            Ok(self.tools.clone())
        }

        fn protocol_name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn routes_to_the_owning_protocol() {
        let mut registry = ToolRegistry::empty();
        registry
            .add_protocol(Arc::new(StaticProtocol {
                name: "local",
                tools: vec![ToolMetadata::new("lookup", "Look something up")],
            }))
            .await
            .unwrap();

        let result = registry.execute("lookup", json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["ran"], "lookup");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result_not_an_error() {
        let registry = ToolRegistry::empty();
        let result = registry.execute("nope", json!({})).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn earlier_binding_wins_on_name_collision() {
        let mut registry = ToolRegistry::empty();
        registry
            .add_protocol(Arc::new(StaticProtocol {
                name: "first",
                tools: vec![ToolMetadata::new("dup", "first binding")],
            }))
            .await
            .unwrap();
        registry
            .add_protocol(Arc::new(StaticProtocol {
                name: "second",
                tools: vec![ToolMetadata::new("dup", "second binding")],
            }))
            .await
            .unwrap();

        assert_eq!(registry.list_tools().len(), 1);
        assert_eq!(registry.list_tools()[0].description, "first binding");
    }
}
