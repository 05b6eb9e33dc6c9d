//! Agent adapters: the uniform surface the turn controller drives.
//!
//! A [`ChatAgent`] receives the shared conversation and produces exactly one
//! new message when asked to speak. Whatever happens inside — tool calls,
//! retries against its own backend, domain-specific processing — is opaque
//! to the controller. Failures surface as [`AgentExecutionError`]; the
//! controller never retries and never fabricates a response.
//!
//! [`LlmAgent`] is the default adapter. It keeps a private execution context
//! fed by [`ChatAgent::receive`]: the controller publishes every message
//! appended to the shared history (including messages the agent did not
//! author) to every agent, so each agent's context stays complete without
//! any channel interception tricks.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::groupchat::client_wrapper::{ClientWrapper, Message, Role, SamplingOptions};
use crate::groupchat::history::{ChatHistory, ChatMessage};
use crate::groupchat::tool_protocol::ToolRegistry;

/// Cap on tool-call round-trips inside a single agent turn.
const MAX_TOOL_ITERATIONS: usize = 5;

/// An agent's own model/tool/network failure, surfaced to the controller.
#[derive(Debug, Clone)]
pub struct AgentExecutionError {
    /// Name of the agent that failed.
    pub agent: String,
    pub message: String,
}

impl AgentExecutionError {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        AgentExecutionError {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AgentExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent '{}' failed: {}", self.agent, self.message)
    }
}

impl Error for AgentExecutionError {}

/// Uniform surface for anything that can hold the floor in a group chat.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Participant name this agent speaks as.
    fn name(&self) -> &str;

    /// Produce exactly one new message given the shared history.
    async fn respond(&self, history: &ChatHistory) -> Result<String, AgentExecutionError>;

    /// Deliver a message from the shared history to this agent's private
    /// execution context. Called by the controller for *every* appended
    /// message, whoever authored it. Default: no-op for stateless agents.
    async fn receive(&self, _message: &ChatMessage) {}
}

/// The default LLM-backed agent adapter.
pub struct LlmAgent {
    name: String,
    instructions: String,
    client: Arc<dyn ClientWrapper>,
    sampling: Option<SamplingOptions>,
    tool_registry: Option<Arc<ToolRegistry>>,
    /// Private execution context, fed exclusively through `receive`.
    context: Mutex<Vec<Message>>,
}

impl LlmAgent {
    pub fn new(name: impl Into<String>, client: Arc<dyn ClientWrapper>) -> Self {
        LlmAgent {
            name: name.into(),
            instructions: String::new(),
            client,
            sampling: None,
            tool_registry: None,
            context: Mutex::new(Vec::new()),
        }
    }

    /// System instructions steering this agent. For the facilitator these
    /// have already had the `{{aiAgents}}` roster interpolated.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Sampling temperature for this agent; pass `None` when the backend
    /// rejects the parameter.
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.sampling = Some(SamplingOptions {
            temperature,
            seed: Some(42),
            json_output: false,
        });
        self
    }

    /// Grant access to a registry of tools.
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = Some(registry);
        self
    }

    fn system_message(&self) -> Message {
        let mut content = self.instructions.clone();
        if let Some(registry) = &self.tool_registry {
            if !registry.is_empty() {
                content.push_str(&registry.render_tool_help());
            }
        }
        Message {
            role: Role::System,
            content,
        }
    }

    /// Parse a `{"tool_call": {"name": ..., "parameters": ...}}` fragment
    /// from an LLM response, if present.
    fn parse_tool_call(response: &str) -> Option<(String, serde_json::Value)> {
        let start = response.find("{\"tool_call\"")?;
        let mut depth = 0usize;
        let mut end = start;
        for (offset, ch) in response[start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + offset + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end <= start {
            return None;
        }
        let parsed: serde_json::Value = serde_json::from_str(&response[start..end]).ok()?;
        let call = parsed.get("tool_call")?;
        let name = call.get("name")?.as_str()?.to_string();
        let parameters = call.get("parameters")?.clone();
        Some((name, parameters))
    }
}

#[async_trait]
impl ChatAgent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, _history: &ChatHistory) -> Result<String, AgentExecutionError> {
        // Work on a scratch copy: tool-call exchanges are transient and must
        // not pollute the durable per-agent context, which only ever grows
        // through `receive`.
        let mut messages = {
            let context = self.context.lock().await;
            let mut messages = Vec::with_capacity(context.len() + 1);
            messages.push(self.system_message());
            messages.extend_from_slice(&context);
            messages
        };

        let mut tool_iteration = 0usize;
        loop {
            let response = self
                .client
                .send_message(&messages, self.sampling.clone())
                .await
                .map_err(|err| AgentExecutionError::new(&self.name, err.to_string()))?;

            let registry = match &self.tool_registry {
                Some(registry) if !registry.is_empty() => registry,
                _ => return Ok(response.content),
            };

            let (tool_name, parameters) = match Self::parse_tool_call(&response.content) {
                Some(call) => call,
                None => return Ok(response.content),
            };

            if tool_iteration >= MAX_TOOL_ITERATIONS {
                log::warn!(
                    "Agent '{}' hit the tool iteration cap; returning last response",
                    self.name
                );
                return Ok(format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    response.content
                ));
            }
            tool_iteration += 1;

            let result = registry
                .execute(&tool_name, parameters)
                .await
                .map_err(|err| AgentExecutionError::new(&self.name, err.to_string()))?;

            let result_text = if result.success {
                format!(
                    "Tool '{}' executed successfully. Result: {}",
                    tool_name,
                    serde_json::to_string_pretty(&result.output)
                        .unwrap_or_else(|_| format!("{:?}", result.output))
                )
            } else {
                format!(
                    "Tool '{}' failed. Error: {}",
                    tool_name,
                    result.error.unwrap_or_else(|| "Unknown error".to_string())
                )
            };

            messages.push(Message {
                role: Role::Assistant,
                content: response.content,
            });
            messages.push(Message {
                role: Role::User,
                content: result_text,
            });
        }
    }

    async fn receive(&self, message: &ChatMessage) {
        let converted = if message.author == self.name {
            Message {
                role: Role::Assistant,
                content: message.content.clone(),
            }
        } else {
            // Other speakers (human or agent) arrive as attributed user
            // messages so the model can tell participants apart.
            Message {
                role: Role::User,
                content: format!("{}: {}", message.author, message.content),
            }
        };
        self.context.lock().await.push(converted);
    }
}

/// Interpolate the facilitator's `{{aiAgents}}` placeholder with the full
/// participant roster.
pub fn interpolate_roster(instructions: &str, roster: &str) -> String {
    instructions.replace("{{aiAgents}}", roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groupchat::client_wrapper::{ClientError, TokenUsage};
    use crate::groupchat::tool_protocol::{ToolMetadata, ToolResult};
    use crate::groupchat::tool_protocols::FunctionToolProtocol;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct ScriptedClient {
        responses: StdMutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<&str>) -> Self {
            ScriptedClient {
                responses: StdMutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _options: Option<SamplingOptions>,
        ) -> Result<Message, ClientError> {
            let mut responses = self.responses.lock().unwrap();
            let content = responses.pop().ok_or("script exhausted")?;
            Ok(Message {
                role: Role::Assistant,
                content,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn usage_slot(&self) -> Option<&StdMutex<Option<TokenUsage>>> {
            None
        }
    }

    fn chat_message(author: &str, content: &str, index: u64) -> ChatMessage {
        ChatMessage {
            author: author.to_string(),
            content: content.to_string(),
            sequence_index: index,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn respond_returns_the_model_reply() {
        let agent = LlmAgent::new(
            "Radiology",
            Arc::new(ScriptedClient::new(vec!["The scan is clear."])),
        )
        .with_instructions("You read imaging studies.");

        agent
            .receive(&chat_message("user", "What does the CT show?", 0))
            .await;

        let reply = agent.respond(&ChatHistory::new()).await.unwrap();
        assert_eq!(reply, "The scan is clear.");
    }

    #[tokio::test]
    async fn respond_runs_the_tool_loop() {
        let provider = FunctionToolProtocol::new();
        provider.register_tool(
            ToolMetadata::new("add", "Adds two numbers"),
            Arc::new(|params| {
                let a = params["a"].as_f64().unwrap_or(0.0);
                let b = params["b"].as_f64().unwrap_or(0.0);
                Ok(ToolResult::success(json!({ "sum": a + b })))
            }),
        );
        let mut registry = crate::groupchat::tool_protocol::ToolRegistry::empty();
        registry.add_protocol(Arc::new(provider)).await.unwrap();

        let agent = LlmAgent::new(
            "Math",
            Arc::new(ScriptedClient::new(vec![
                r#"{"tool_call": {"name": "add", "parameters": {"a": 5, "b": 3}}}"#,
                "The sum is 8.",
            ])),
        )
        .with_tools(Arc::new(registry));

        let reply = agent.respond(&ChatHistory::new()).await.unwrap();
        assert_eq!(reply, "The sum is 8.");
    }

    #[tokio::test]
    async fn tool_exchanges_do_not_leak_into_the_context() {
        let provider = FunctionToolProtocol::new();
        provider.register_tool(
            ToolMetadata::new("noop", "Does nothing"),
            Arc::new(|_| Ok(ToolResult::success(json!(null)))),
        );
        let mut registry = crate::groupchat::tool_protocol::ToolRegistry::empty();
        registry.add_protocol(Arc::new(provider)).await.unwrap();

        let agent = LlmAgent::new(
            "Worker",
            Arc::new(ScriptedClient::new(vec![
                r#"{"tool_call": {"name": "noop", "parameters": {}}}"#,
                "done",
            ])),
        )
        .with_tools(Arc::new(registry));

        agent.receive(&chat_message("user", "go", 0)).await;
        let _ = agent.respond(&ChatHistory::new()).await.unwrap();

        assert_eq!(agent.context.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_execution_error() {
        let agent = LlmAgent::new("Flaky", Arc::new(ScriptedClient::new(vec![])));
        let err = agent.respond(&ChatHistory::new()).await.unwrap_err();
        assert_eq!(err.agent, "Flaky");
    }

    #[tokio::test]
    async fn receive_attributes_other_speakers() {
        let agent = LlmAgent::new("Radiology", Arc::new(ScriptedClient::new(vec![])));
        agent
            .receive(&chat_message("Facilitator", "back to you Radiology", 0))
            .await;
        agent.receive(&chat_message("Radiology", "on it", 1)).await;

        let context = agent.context.lock().await;
        assert_eq!(context[0].role, Role::User);
        assert!(context[0].content.starts_with("Facilitator: "));
        assert_eq!(context[1].role, Role::Assistant);
        assert_eq!(context[1].content, "on it");
    }

    #[test]
    fn roster_interpolation_replaces_the_placeholder() {
        let out = interpolate_roster(
            "Coordinate these agents:\n{{aiAgents}}",
            "- Radiology: Reads imaging studies",
        );
        assert!(out.contains("- Radiology: Reads imaging studies"));
        assert!(!out.contains("{{aiAgents}}"));
    }
}
