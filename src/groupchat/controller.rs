//! The turn controller: the state machine that decides who speaks next and
//! when the conversation yields back to the human.
//!
//! One [`GroupChatSession`] drives one conversation strictly sequentially:
//!
//! ```text
//! AWAITING_SELECTION ──► AGENT_EXECUTING ──► AWAITING_TERMINATION_CHECK
//!        ▲                                   (facilitator turns only)
//!        │                                         │
//!        └──────────────── "no" ───────────────────┤
//!                                                  ├─ "yes" ──► YIELDED
//!                                  iteration cap ──┴──────────► HALTED
//! ```
//!
//! Selection and dispatch never overlap for the same session, which is what
//! keeps the shared history's strictly-increasing sequence invariant cheap
//! to maintain. The facilitator is the single point of termination
//! authority: no other agent can end the human-facing turn. A hard ceiling
//! of 30 automated turns per round guards against cyclic hand-offs between
//! agents that never involve the facilitator.
//!
//! "Each participant speaks once per round" remains a soft rule carried only
//! by the selection prompt; the state machine does not enforce it.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::groupchat::agent::{interpolate_roster, AgentExecutionError, ChatAgent, LlmAgent};
use crate::groupchat::classifier::{
    resolve_selection, resolve_termination, selection_prompt, termination_prompt, ClassifierError,
    DecisionClassifier, LlmClassifier,
};
use crate::groupchat::client_wrapper::ClientWrapper;
use crate::groupchat::clients::openai::OpenAIClient;
use crate::groupchat::config::{
    AgentConfig, AppContext, ChatContext, ConfigurationError, DEFAULT_MODEL_TEMPERATURE,
};
use crate::groupchat::history::{ChatHistory, ChatMessage};
use crate::groupchat::participant::ParticipantRegistry;
use crate::groupchat::tool_protocols::{wire_tools, FunctionToolProtocol};

/// Hard ceiling on automated turns per human-initiated round.
pub const DEFAULT_MAX_ITERATIONS: usize = 30;

/// Author recorded for messages typed by the human.
pub const USER_AUTHOR: &str = "user";

/// Where the controller currently is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingSelection,
    AgentExecuting,
    AwaitingTerminationCheck,
    /// The facilitator decided to hand control back to the human.
    Yielded,
    /// The iteration ceiling forced a yield.
    Halted,
}

/// Why a round ended. Callers must treat these distinctly: `Halted` means
/// the safety valve fired, not that the facilitator chose to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Yielded,
    Halted,
}

/// What a completed round produced.
#[derive(Debug)]
pub struct RoundOutcome {
    pub reason: StopReason,
    /// Agent turns taken in this round.
    pub turns_taken: usize,
    /// Messages appended during this round, in order.
    pub messages: Vec<ChatMessage>,
}

/// Errors surfaced by a session. Configuration problems appear at build
/// time; the rest per turn. The controller retries nothing itself.
#[derive(Debug)]
pub enum ChatError {
    Configuration(ConfigurationError),
    Classifier(ClassifierError),
    Agent(AgentExecutionError),
    /// A classifier selected a participant with no registered adapter.
    UnknownParticipant(String),
    /// The session was cancelled; no further history mutation is allowed.
    Cancelled,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Configuration(err) => write!(f, "{}", err),
            ChatError::Classifier(err) => write!(f, "{}", err),
            ChatError::Agent(err) => write!(f, "{}", err),
            ChatError::UnknownParticipant(name) => {
                write!(f, "No adapter registered for participant '{}'", name)
            }
            ChatError::Cancelled => write!(f, "Session cancelled"),
        }
    }
}

impl Error for ChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChatError::Configuration(err) => Some(err),
            ChatError::Classifier(err) => Some(err),
            ChatError::Agent(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for ChatError {
    fn from(err: ConfigurationError) -> Self {
        ChatError::Configuration(err)
    }
}

impl From<ClassifierError> for ChatError {
    fn from(err: ClassifierError) -> Self {
        ChatError::Classifier(err)
    }
}

impl From<AgentExecutionError> for ChatError {
    fn from(err: AgentExecutionError) -> Self {
        ChatError::Agent(err)
    }
}

/// One group chat conversation: participants, adapters, classifiers, and
/// the shared append-only history. Sessions are independent; nothing is
/// shared between two sessions.
pub struct GroupChatSession {
    registry: ParticipantRegistry,
    agents: HashMap<String, Arc<dyn ChatAgent>>,
    selection: Arc<dyn DecisionClassifier>,
    termination: Arc<dyn DecisionClassifier>,
    history: ChatHistory,
    max_iterations: usize,
    iteration_count: usize,
    state: TurnState,
    active: bool,
}

impl GroupChatSession {
    /// Assemble a session from already-built parts. Most hosts go through
    /// [`GroupChatSessionBuilder`] instead; this constructor exists for
    /// tests and for hosts wiring custom adapters end to end.
    pub fn new(
        registry: ParticipantRegistry,
        agents: Vec<Arc<dyn ChatAgent>>,
        selection: Arc<dyn DecisionClassifier>,
        termination: Arc<dyn DecisionClassifier>,
    ) -> Self {
        let agents = agents
            .into_iter()
            .map(|agent| (agent.name().to_string(), agent))
            .collect();
        GroupChatSession {
            registry,
            agents,
            selection,
            termination,
            history: ChatHistory::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            iteration_count: 0,
            state: TurnState::AwaitingSelection,
            active: true,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Seed the session with a resumed history. Every resumed message is
    /// also published to the agents so their private contexts match the
    /// shared transcript.
    pub async fn with_history(mut self, history: ChatHistory) -> Self {
        for message in history.messages() {
            self.publish(message).await;
        }
        self.history = history;
        self
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Abort the session. Checked before every append, so an in-flight
    /// agent or classifier call abandoned by the host can never mutate the
    /// history afterwards.
    pub fn cancel(&mut self) {
        self.active = false;
    }

    /// Record a message from the human and start a new round: the iteration
    /// counter resets and the controller re-enters `AWAITING_SELECTION`.
    pub async fn post_user_message(
        &mut self,
        content: impl Into<String>,
    ) -> Result<ChatMessage, ChatError> {
        if !self.active {
            return Err(ChatError::Cancelled);
        }
        let message = self.history.append(USER_AUTHOR, content).clone();
        self.publish(&message).await;
        self.iteration_count = 0;
        self.state = TurnState::AwaitingSelection;
        Ok(message)
    }

    /// Run automated turns until the facilitator yields, the ceiling fires,
    /// or an error surfaces. Both terminal states are resumable: post a new
    /// user message and call this again.
    pub async fn run_round(&mut self) -> Result<RoundOutcome, ChatError> {
        let mut produced: Vec<ChatMessage> = Vec::new();

        loop {
            if !self.active {
                return Err(ChatError::Cancelled);
            }

            self.state = TurnState::AwaitingSelection;
            let speaker = self.select_speaker().await?;

            self.state = TurnState::AgentExecuting;
            let agent = self
                .agents
                .get(&speaker)
                .cloned()
                .ok_or_else(|| ChatError::UnknownParticipant(speaker.clone()))?;

            // An agent failure surfaces as-is; nothing is appended for a
            // failed turn.
            let content = agent.respond(&self.history).await?;

            if !self.active {
                return Err(ChatError::Cancelled);
            }
            let message = self.history.append(&speaker, content).clone();
            self.publish(&message).await;
            self.iteration_count += 1;
            produced.push(message.clone());

            let facilitator_spoke = speaker == self.registry.facilitator().name;
            if facilitator_spoke {
                self.state = TurnState::AwaitingTerminationCheck;
                let prompt = termination_prompt(&self.registry, &message);
                let verdict = self.termination.classify(&prompt).await?;
                if resolve_termination(&verdict)? {
                    log::info!(
                        "Facilitator yielded control after {} turn(s)",
                        self.iteration_count
                    );
                    self.state = TurnState::Yielded;
                    return Ok(RoundOutcome {
                        reason: StopReason::Yielded,
                        turns_taken: self.iteration_count,
                        messages: produced,
                    });
                }
            }

            if self.iteration_count >= self.max_iterations {
                log::warn!(
                    "Iteration ceiling ({}) reached; forcing yield to the user",
                    self.max_iterations
                );
                self.state = TurnState::Halted;
                return Ok(RoundOutcome {
                    reason: StopReason::Halted,
                    turns_taken: self.iteration_count,
                    messages: produced,
                });
            }
        }
    }

    /// Pick the next speaker.
    ///
    /// Bootstrap rule: when the only message so far is the human's, the
    /// facilitator opens — no classifier round-trip, and the opening move is
    /// deterministic. Everything else goes through the selection classifier
    /// over the full history, normalized with facilitator fallback.
    async fn select_speaker(&self) -> Result<String, ChatError> {
        if self.history.len() == 1 {
            if let Some(first) = self.history.last() {
                if !self.registry.contains(&first.author) {
                    return Ok(self.registry.facilitator().name.clone());
                }
            }
        }

        let prompt = selection_prompt(&self.registry, &self.history);
        log::debug!("Selection prompt:\n{}", prompt);
        let verdict = self.selection.classify(&prompt).await?;
        Ok(resolve_selection(&verdict, &self.registry).name.clone())
    }

    /// Explicit publish step: deliver an appended message to every agent's
    /// private execution context, including agents that did not author it.
    async fn publish(&self, message: &ChatMessage) {
        for agent in self.agents.values() {
            agent.receive(message).await;
        }
    }
}

/// Builds a [`GroupChatSession`] from configuration: registry, LLM agents
/// (with tools wired), classifiers, and any resumed history.
pub struct GroupChatSessionBuilder {
    app_ctx: Option<AppContext>,
    chat_ctx: ChatContext,
    configs: Vec<AgentConfig>,
    special_agents: HashMap<String, Arc<dyn ChatAgent>>,
    function_tools: Option<Arc<FunctionToolProtocol>>,
    selection: Option<Arc<dyn DecisionClassifier>>,
    termination: Option<Arc<dyn DecisionClassifier>>,
    max_iterations: usize,
}

impl GroupChatSessionBuilder {
    pub fn new(chat_ctx: ChatContext, configs: Vec<AgentConfig>) -> Self {
        GroupChatSessionBuilder {
            app_ctx: None,
            chat_ctx,
            configs,
            special_agents: HashMap::new(),
            function_tools: None,
            selection: None,
            termination: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Model backend + credentials for LLM-backed agents and classifiers.
    pub fn with_app_context(mut self, app_ctx: AppContext) -> Self {
        self.app_ctx = Some(app_ctx);
        self
    }

    /// Register the adapter for a config record flagged `special_agent`.
    pub fn with_special_agent(mut self, agent: Arc<dyn ChatAgent>) -> Self {
        self.special_agents.insert(agent.name().to_string(), agent);
        self
    }

    /// Host-registered function tools referenced by `function` tool configs.
    pub fn with_function_tools(mut self, tools: Arc<FunctionToolProtocol>) -> Self {
        self.function_tools = Some(tools);
        self
    }

    /// Override the selection classifier (deterministic fakes in tests).
    pub fn with_selection_classifier(mut self, classifier: Arc<dyn DecisionClassifier>) -> Self {
        self.selection = Some(classifier);
        self
    }

    /// Override the termination classifier.
    pub fn with_termination_classifier(mut self, classifier: Arc<dyn DecisionClassifier>) -> Self {
        self.termination = Some(classifier);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn make_client(&self) -> Result<Arc<dyn ClientWrapper>, ConfigurationError> {
        let app_ctx = self.app_ctx.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid(
                "Model backend configuration required (call with_app_context)".to_string(),
            )
        })?;
        Ok(Arc::new(OpenAIClient::new_with_base_url(
            &app_ctx.api_key,
            &app_ctx.model.model,
            &app_ctx.model.base_url,
        )))
    }

    pub async fn build(self) -> Result<GroupChatSession, ChatError> {
        let registry = ParticipantRegistry::from_configs(&self.configs)?;
        let history = ChatHistory::from_messages(self.chat_ctx.resumed_history.clone())?;
        let roster = registry.roster();
        let supports_temperature = self
            .app_ctx
            .as_ref()
            .map(|ctx| ctx.model.supports_temperature)
            .unwrap_or(true);

        let mut agents: Vec<Arc<dyn ChatAgent>> = Vec::new();
        for config in &self.configs {
            if !registry.contains(&config.name) {
                // Background agents never enter the turn-taking protocol.
                continue;
            }

            if config.special_agent {
                let agent = self.special_agents.get(&config.name).cloned().ok_or_else(|| {
                    ConfigurationError::Invalid(format!(
                        "Agent '{}' is flagged special_agent but no adapter was registered",
                        config.name
                    ))
                })?;
                agents.push(agent);
                continue;
            }

            let instructions = {
                let raw = config.instructions.clone().unwrap_or_default();
                if config.facilitator {
                    interpolate_roster(&raw, &roster)
                } else {
                    raw
                }
            };

            let temperature = if supports_temperature {
                let value = config.temperature.unwrap_or(DEFAULT_MODEL_TEMPERATURE);
                log::info!("Setting model temperature for agent {} to {}", config.name, value);
                Some(value)
            } else {
                log::info!(
                    "Model does not support temperature. Setting temperature to None for agent {}",
                    config.name
                );
                None
            };

            let mut agent = LlmAgent::new(&config.name, self.make_client()?)
                .with_instructions(instructions)
                .with_temperature(temperature);

            if let Some(tool_registry) =
                wire_tools(&config.name, &config.tools, &self.chat_ctx, self.function_tools.as_ref())
                    .await?
            {
                agent = agent.with_tools(Arc::new(tool_registry));
            }

            agents.push(Arc::new(agent));
        }

        let selection = match self.selection.clone() {
            Some(classifier) => classifier,
            None => Arc::new(LlmClassifier::new(self.make_client()?, supports_temperature)),
        };
        let termination = match self.termination.clone() {
            Some(classifier) => classifier,
            None => Arc::new(LlmClassifier::new(self.make_client()?, supports_temperature)),
        };

        let session = GroupChatSession::new(registry, agents, selection, termination)
            .with_max_iterations(self.max_iterations)
            .with_history(history)
            .await;

        Ok(session)
    }
}
