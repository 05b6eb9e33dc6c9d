//! # GroupChat
//!
//! GroupChat is a Rust toolkit for running moderated multi-agent conversations: several
//! LLM-backed agents share one transcript, a designated facilitator opens and closes each
//! round, and LLM classifiers decide who speaks next and when control returns to the human.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Turn Control**: [`GroupChatSession`] runs a strict one-speaker-at-a-time loop with a
//!   hard iteration ceiling, so a round of automated turns always ends — either because the
//!   facilitator yields or because the safety valve fires
//! * **Decision Classifiers**: [`classifier`] isolates the two LLM judgement calls (speaker
//!   selection and termination) behind one trait, with deterministic sampling and strict
//!   verdict contracts
//! * **Agents with Tools**: [`ChatAgent`] adapters over any [`ClientWrapper`], each holding a
//!   private execution context fed by an explicit publish step, with local function tools and
//!   remote OpenAPI tools routed through [`tool_protocol::ToolRegistry`]
//! * **Shared History**: [`ChatHistory`], an append-only transcript with strictly increasing
//!   sequence indices, resumable from persisted messages
//! * **Provider Flexibility**: [`ClientWrapper`] implemented for OpenAI-compatible endpoints,
//!   easy to stub out in tests
//!
//! ## Core Concepts
//!
//! ### Sessions: A Moderated Round
//!
//! A session is built from configuration records. The human posts a message, the controller
//! runs agent turns until the facilitator hands control back, and the round's messages come
//! out in order:
//!
//! ```rust,no_run
//! use groupchat::config::{parse_agent_configs, AppContext, ChatContext, ModelConfig};
//! use groupchat::GroupChatSessionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     groupchat::init_logger();
//!
//!     let configs = parse_agent_configs(
//!         r#"[
//!             {"name": "Coordinator", "description": "Leads the discussion",
//!              "facilitator": true,
//!              "instructions": "You coordinate these specialists:\n{{aiAgents}}"},
//!             {"name": "Radiology", "description": "Reads imaging studies"},
//!             {"name": "Cardiology", "description": "Evaluates cardiac findings"}
//!         ]"#,
//!     )?;
//!
//!     let app_ctx = AppContext::new(ModelConfig::default(), std::env::var("OPEN_AI_SECRET")?);
//!     let mut session = GroupChatSessionBuilder::new(ChatContext::new(), configs)
//!         .with_app_context(app_ctx)
//!         .build()
//!         .await?;
//!
//!     session.post_user_message("Please review this chest CT report.").await?;
//!     let outcome = session.run_round().await?;
//!     for message in &outcome.messages {
//!         println!("{}: {}", message.author, message.content);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Custom Adapters
//!
//! Any participant can be backed by your own [`ChatAgent`] implementation instead of the
//! default LLM agent — flag its record `special_agent` and register the adapter on the
//! builder. The controller only ever sees the trait.
//!
//! Continue exploring the modules re-exported from the crate root for the individual pieces.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding GroupChat can opt in to simple `RUST_LOG` driven
/// diagnostics without choosing a logging backend upfront.
///
/// ```rust
/// groupchat::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `groupchat` module.
pub mod groupchat;

// Re-exporting key items for easier external access.
pub use groupchat::agent;
pub use groupchat::agent::{AgentExecutionError, ChatAgent, LlmAgent};
pub use groupchat::classifier;
pub use groupchat::classifier::{ClassifierError, DecisionClassifier, LlmClassifier, Verdict};
pub use groupchat::client_wrapper;
pub use groupchat::client_wrapper::{ClientWrapper, Message, Role, SamplingOptions};
pub use groupchat::clients;
pub use groupchat::config;
pub use groupchat::config::{AgentConfig, AppContext, ChatContext, ModelConfig, ToolConfig};
pub use groupchat::controller;
pub use groupchat::controller::{
    ChatError, GroupChatSession, GroupChatSessionBuilder, RoundOutcome, StopReason, TurnState,
};
pub use groupchat::history;
pub use groupchat::history::{ChatHistory, ChatMessage};
pub use groupchat::participant;
pub use groupchat::participant::{Participant, ParticipantRegistry};
pub use groupchat::tool_protocol;
pub use groupchat::tool_protocols;
