//! Built-in [`ToolProtocol`] implementations and the config-driven wiring
//! that attaches them to agents.
//!
//! Two tool types exist in configuration: `function` (host-registered Rust
//! closures) and `openapi` (remote HTTP operations). Unknown types never get
//! this far — they already failed deserialization in
//! [`config`](crate::config).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::groupchat::clients::get_shared_http_client;
use crate::groupchat::config::{ChatContext, ConfigurationError, ToolConfig};
use crate::groupchat::tool_protocol::{
    ToolError, ToolMetadata, ToolProtocol, ToolRegistry, ToolResult,
};

/// Signature for host-registered function tools.
pub type ToolHandler = dyn Fn(Value) -> Result<ToolResult, ToolError> + Send + Sync;

/// Local function tools registered by the host application.
///
/// The host registers every function tool it knows about once; each agent's
/// configuration then names the subset that agent may call.
#[derive(Default)]
pub struct FunctionToolProtocol {
    tools: RwLock<HashMap<String, (ToolMetadata, Arc<ToolHandler>)>>,
}

impl FunctionToolProtocol {
    pub fn new() -> Self {
        FunctionToolProtocol::default()
    }

    pub fn register_tool(&self, metadata: ToolMetadata, handler: Arc<ToolHandler>) {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        tools.insert(metadata.name.clone(), (metadata, handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    fn get(&self, name: &str) -> Option<(ToolMetadata, Arc<ToolHandler>)> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ToolProtocol for FunctionToolProtocol {
    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolResult, ToolError> {
        match self.get(tool_name) {
            Some((_, handler)) => handler(parameters),
            None => Ok(ToolResult::failure(format!(
                "Unknown function tool: {}",
                tool_name
            ))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
        Ok(self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|(metadata, _)| metadata.clone())
            .collect())
    }

    fn protocol_name(&self) -> &str {
        "function"
    }
}

/// A view over a [`FunctionToolProtocol`] exposing only the named tools, so
/// an agent configured with one function tool does not see the host's whole
/// catalog.
struct ScopedFunctionTools {
    source: Arc<FunctionToolProtocol>,
    names: Vec<String>,
}

#[async_trait]
impl ToolProtocol for ScopedFunctionTools {
    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolResult, ToolError> {
        if !self.names.iter().any(|n| n == tool_name) {
            return Ok(ToolResult::failure(format!(
                "Tool '{}' is not available to this agent",
                tool_name
            )));
        }
        self.source.execute(tool_name, parameters).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
        let all = self.source.list_tools().await?;
        Ok(all
            .into_iter()
            .filter(|tool| self.names.iter().any(|n| n == &tool.name))
            .collect())
    }

    fn protocol_name(&self) -> &str {
        "function"
    }
}

/// Remote tool backed by an OpenAPI-described HTTP service.
///
/// Each call POSTs the parameters as JSON to the service and forwards the
/// session's `conversation-id` header so the service can correlate calls
/// with the conversation.
pub struct OpenApiToolProtocol {
    name: String,
    metadata: ToolMetadata,
    endpoint: String,
    conversation_id: String,
    timeout: Duration,
    debug_logging: bool,
}

impl OpenApiToolProtocol {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        conversation_id: impl Into<String>,
        timeout: Duration,
        debug_logging: bool,
    ) -> Self {
        let name = name.into();
        OpenApiToolProtocol {
            metadata: ToolMetadata::new(
                name.clone(),
                format!("Remote OpenAPI operation '{}'", name),
            ),
            name,
            endpoint: endpoint.into(),
            conversation_id: conversation_id.into(),
            timeout,
            debug_logging,
        }
    }
}

#[async_trait]
impl ToolProtocol for OpenApiToolProtocol {
    async fn execute(&self, tool_name: &str, parameters: Value) -> Result<ToolResult, ToolError> {
        if self.debug_logging {
            log::debug!(
                "OpenAPI tool '{}' request to {}: {}",
                tool_name,
                self.endpoint,
                parameters
            );
        }

        let response = get_shared_http_client()
            .post(&self.endpoint)
            .header("conversation-id", &self.conversation_id)
            .timeout(self.timeout)
            .json(&parameters)
            .send()
            .await
            .map_err(|err| Box::new(err) as ToolError)?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if self.debug_logging {
            log::debug!("OpenAPI tool '{}' response {}: {}", tool_name, status, body);
        }

        if status.is_success() {
            Ok(ToolResult::success(body))
        } else {
            Ok(ToolResult::failure(format!(
                "OpenAPI tool '{}' returned {}",
                tool_name, status
            )))
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
        Ok(vec![self.metadata.clone()])
    }

    fn protocol_name(&self) -> &str {
        &self.name
    }
}

/// Build one agent's [`ToolRegistry`] from its tool configuration records.
///
/// Returns `Ok(None)` when the agent has no tools. Function tools must
/// already be registered with the host's [`FunctionToolProtocol`]; naming an
/// unregistered one is a setup-time error, consistent with the rule that
/// configuration problems surface before the conversation loop starts.
pub async fn wire_tools(
    agent_name: &str,
    tools: &[ToolConfig],
    chat_ctx: &ChatContext,
    functions: Option<&Arc<FunctionToolProtocol>>,
) -> Result<Option<ToolRegistry>, ConfigurationError> {
    if tools.is_empty() {
        return Ok(None);
    }

    let mut registry = ToolRegistry::empty();
    let mut function_names: Vec<String> = Vec::new();

    for tool in tools {
        match tool {
            ToolConfig::Function { name } => {
                let provider = functions.ok_or_else(|| {
                    ConfigurationError::Invalid(format!(
                        "Agent '{}' requests function tool '{}' but no function tools were registered",
                        agent_name, name
                    ))
                })?;
                if !provider.contains(name) {
                    return Err(ConfigurationError::Invalid(format!(
                        "Agent '{}' requests unknown function tool '{}'",
                        agent_name, name
                    )));
                }
                function_names.push(name.clone());
            }
            ToolConfig::OpenApi {
                name,
                openapi_document_path,
                server_url_override,
                timeout,
                debug_logging,
            } => {
                let endpoint = server_url_override
                    .clone()
                    .unwrap_or_else(|| openapi_document_path.clone());
                let protocol = OpenApiToolProtocol::new(
                    name.clone(),
                    endpoint,
                    chat_ctx.conversation_id.clone(),
                    Duration::from_secs(*timeout),
                    *debug_logging,
                );
                registry
                    .add_protocol(Arc::new(protocol))
                    .await
                    .map_err(|err| ConfigurationError::Invalid(err.to_string()))?;
            }
        }
    }

    if !function_names.is_empty() {
        let scoped = ScopedFunctionTools {
            source: Arc::clone(functions.unwrap()),
            names: function_names,
        };
        registry
            .add_protocol(Arc::new(scoped))
            .await
            .map_err(|err| ConfigurationError::Invalid(err.to_string()))?;
    }

    Ok(Some(registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider_with_add() -> Arc<FunctionToolProtocol> {
        let provider = FunctionToolProtocol::new();
        provider.register_tool(
            ToolMetadata::new("add", "Adds two numbers"),
            Arc::new(|params| {
                let a = params["a"].as_f64().unwrap_or(0.0);
                let b = params["b"].as_f64().unwrap_or(0.0);
                Ok(ToolResult::success(json!({ "sum": a + b })))
            }),
        );
        Arc::new(provider)
    }

    #[tokio::test]
    async fn wires_and_executes_a_function_tool() {
        let provider = provider_with_add();
        let chat_ctx = ChatContext::new();
        let tools = vec![ToolConfig::Function {
            name: "add".to_string(),
        }];

        let registry = wire_tools("Math", &tools, &chat_ctx, Some(&provider))
            .await
            .unwrap()
            .unwrap();

        let result = registry
            .execute("add", json!({"a": 5, "b": 3}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["sum"], 8.0);
    }

    #[tokio::test]
    async fn unregistered_function_tool_fails_at_setup() {
        let provider = provider_with_add();
        let chat_ctx = ChatContext::new();
        let tools = vec![ToolConfig::Function {
            name: "subtract".to_string(),
        }];

        let result = wire_tools("Math", &tools, &chat_ctx, Some(&provider)).await;
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[tokio::test]
    async fn no_tools_means_no_registry() {
        let chat_ctx = ChatContext::new();
        let registry = wire_tools("Plain", &[], &chat_ctx, None).await.unwrap();
        assert!(registry.is_none());
    }

    #[tokio::test]
    async fn scoped_view_hides_other_function_tools() {
        let provider = provider_with_add();
        provider.register_tool(
            ToolMetadata::new("secret", "Not for everyone"),
            Arc::new(|_| Ok(ToolResult::success(json!("hidden")))),
        );
        let chat_ctx = ChatContext::new();
        let tools = vec![ToolConfig::Function {
            name: "add".to_string(),
        }];

        let registry = wire_tools("Math", &tools, &chat_ctx, Some(&provider))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(registry.list_tools().len(), 1);
        let result = registry.execute("secret", json!({})).await.unwrap();
        assert!(!result.success);
    }
}
