//! Configuration for group chat sessions.
//!
//! Everything a session needs is resolved once at startup and threaded in
//! explicitly: the model backend ([`ModelConfig`] inside [`AppContext`]), the
//! conversation being served ([`ChatContext`]), and the ordered agent roster
//! ([`AgentConfig`]). Nothing is read from process-wide state mid-session.
//!
//! Agent records are plain serde structs so hosts can load them from JSON or
//! YAML however they like:
//!
//! ```rust
//! use groupchat::config::AgentConfig;
//!
//! let configs: Vec<AgentConfig> = serde_json::from_str(
//!     r#"[
//!         {"name": "Facilitator", "description": "Coordinates the chat", "facilitator": true},
//!         {"name": "Radiology", "description": "Reads imaging studies",
//!          "tools": [{"type": "function", "name": "fetch_study"}]}
//!     ]"#,
//! ).unwrap();
//!
//! assert!(configs[0].facilitator);
//! assert_eq!(configs[1].tools.len(), 1);
//! ```

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::groupchat::history::ChatMessage;

/// Default per-agent sampling temperature when the model supports one.
pub const DEFAULT_MODEL_TEMPERATURE: f32 = 0.0;

/// Default timeout for OpenAPI tool calls, in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;

/// Setup-time errors. All of these are fatal: the session never starts.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    /// The participant list was empty after filtering background agents.
    NoParticipants,
    /// Two agent records share the same name.
    DuplicateName(String),
    /// A resumed history violated the ordered, gap-free sequence invariant.
    InvalidHistory(String),
    /// Anything else wrong with a configuration record (unknown tool type,
    /// missing required field, unresolvable function tool).
    Invalid(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NoParticipants => {
                write!(f, "No interactive participants configured")
            }
            ConfigurationError::DuplicateName(name) => {
                write!(f, "Duplicate participant name: {}", name)
            }
            ConfigurationError::InvalidHistory(msg) => {
                write!(f, "Invalid resumed history: {}", msg)
            }
            ConfigurationError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for ConfigurationError {}

/// Which model backend to talk to, resolved once at startup.
///
/// `supports_temperature` replaces any environment sniffing: hosts that know
/// their deployment rejects a sampling temperature (some reasoning models do)
/// set it to `false` and every request in the session omits the parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model identifier injected into each request.
    pub model: String,
    /// Whether the deployment accepts a `temperature` parameter.
    pub supports_temperature: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            supports_temperature: true,
        }
    }
}

/// Application-level context shared by every session the host creates.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Model backend configuration.
    pub model: ModelConfig,
    /// API key handed to each LLM client.
    pub api_key: String,
}

impl AppContext {
    pub fn new(model: ModelConfig, api_key: impl Into<String>) -> Self {
        AppContext {
            model,
            api_key: api_key.into(),
        }
    }
}

/// Per-conversation context: identifier plus any previously persisted history.
///
/// The controller does not define a persistence format; it only needs an
/// ordered sequence of message-shaped records to resume from.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    /// Conversation identifier, forwarded to OpenAPI tools as a header.
    pub conversation_id: String,
    /// Messages from an earlier run of this conversation, oldest first.
    pub resumed_history: Vec<ChatMessage>,
}

impl ChatContext {
    /// Start a fresh conversation with a random identifier.
    pub fn new() -> Self {
        ChatContext {
            conversation_id: Uuid::new_v4().to_string(),
            resumed_history: Vec::new(),
        }
    }

    /// Resume a conversation from persisted messages.
    pub fn resume(conversation_id: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        ChatContext {
            conversation_id: conversation_id.into(),
            resumed_history: history,
        }
    }
}

/// How an agent record participates in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Takes part in the turn-taking protocol.
    #[default]
    Interactive,
    /// Participates in execution elsewhere but never in turn-taking
    /// (the record is dropped from the participant registry).
    Background,
}

/// One agent configuration record, in configuration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique participant name within the session.
    pub name: String,
    /// Description embedded into the facilitator roster and selection prompt.
    pub description: String,
    /// Whether this agent opens each round and decides when it ends.
    #[serde(default)]
    pub facilitator: bool,
    /// Interactive (default) or background.
    #[serde(default, rename = "agent_type")]
    pub kind: AgentKind,
    /// Addressed through a host-supplied adapter instead of the default LLM
    /// agent.
    #[serde(default)]
    pub special_agent: bool,
    /// System instructions. For the facilitator, `{{aiAgents}}` is replaced
    /// with the full participant roster at setup time.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Per-agent temperature override; defaults to
    /// [`DEFAULT_MODEL_TEMPERATURE`] when the model supports temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Tools wired into this agent before the conversation loop starts.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// One tool configuration record, tagged by `type`.
///
/// Deserialization of an unknown `type` fails, which surfaces as a fatal
/// [`ConfigurationError`] before the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolConfig {
    /// A host-registered Rust function tool, looked up by name.
    Function { name: String },
    /// An OpenAPI-described remote tool.
    OpenApi {
        name: String,
        openapi_document_path: String,
        #[serde(default)]
        server_url_override: Option<String>,
        #[serde(default = "default_tool_timeout")]
        timeout: u64,
        #[serde(default)]
        debug_logging: bool,
    },
}

impl ToolConfig {
    /// The tool's name regardless of its type.
    pub fn name(&self) -> &str {
        match self {
            ToolConfig::Function { name } => name,
            ToolConfig::OpenApi { name, .. } => name,
        }
    }
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

/// Parse an ordered list of agent records from JSON.
///
/// Unknown tool types or malformed records fail here, before any session
/// machinery is constructed.
pub fn parse_agent_configs(json: &str) -> Result<Vec<AgentConfig>, ConfigurationError> {
    serde_json::from_str(json).map_err(|err| ConfigurationError::Invalid(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_and_openapi_tools() {
        let configs = parse_agent_configs(
            r#"[
                {"name": "Facilitator", "description": "Leads", "facilitator": true,
                 "tools": [{"type": "function", "name": "lookup"}]},
                {"name": "Radiology", "description": "Imaging",
                 "tools": [{"type": "openapi", "name": "pacs",
                            "openapi_document_path": "specs/pacs.json"}]}
            ]"#,
        )
        .unwrap();

        assert_eq!(configs.len(), 2);
        assert!(configs[0].facilitator);
        match &configs[1].tools[0] {
            ToolConfig::OpenApi {
                timeout,
                debug_logging,
                server_url_override,
                ..
            } => {
                assert_eq!(*timeout, DEFAULT_TOOL_TIMEOUT_SECS);
                assert!(!debug_logging);
                assert!(server_url_override.is_none());
            }
            other => panic!("expected openapi tool, got {:?}", other),
        }
    }

    #[test]
    fn unknown_tool_type_is_a_configuration_error() {
        let result = parse_agent_configs(
            r#"[{"name": "A", "description": "x",
                 "tools": [{"type": "webhook", "name": "t"}]}]"#,
        );
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn background_agent_kind_round_trips() {
        let configs = parse_agent_configs(
            r#"[{"name": "magentic", "description": "planner", "agent_type": "background"}]"#,
        )
        .unwrap();
        assert_eq!(configs[0].kind, AgentKind::Background);
    }
}
