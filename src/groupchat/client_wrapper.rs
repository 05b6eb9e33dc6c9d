use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;

/// A ClientWrapper is a wrapper around a specific cloud LLM service.
/// It provides a common interface to interact with the LLMs.
/// It does not keep track of the conversation, for that we use the
/// per-agent execution context kept by [`LlmAgent`](crate::agent::LlmAgent)
/// and the shared [`ChatHistory`](crate::history::ChatHistory).

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    /// Set by the developer to steer the model's responses.
    System,
    /// A message sent by a human user (or app user).
    User,
    /// Lets the model know the content was generated as a response to a user message.
    Assistant,
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

/// Sampling controls forwarded with a request.
///
/// The turn-taking classifiers pin `seed` and `temperature` so the same
/// history produces the same decision across runs; regular agents usually
/// only set `temperature`. Backends that do not support a given knob are
/// expected to receive `None` for it (see
/// [`ModelConfig::supports_temperature`](crate::config::ModelConfig)).
#[derive(Clone, Debug, Default)]
pub struct SamplingOptions {
    /// Sampling temperature, omitted from the request when `None`.
    pub temperature: Option<f32>,
    /// Fixed seed for reproducible outputs, omitted when `None`.
    pub seed: Option<u64>,
    /// Request a JSON object response format from the backend.
    pub json_output: bool,
}

impl SamplingOptions {
    /// Deterministic settings used by the decision classifiers: temperature 0
    /// (when the model accepts one), a fixed seed, and JSON output.
    pub fn deterministic(supports_temperature: bool) -> Self {
        SamplingOptions {
            temperature: if supports_temperature { Some(0.0) } else { None },
            seed: Some(42),
            json_output: true,
        }
    }
}

/// Type alias for the error boxes returned by client calls.
pub type ClientError = Box<dyn Error + Send + Sync>;

/// Trait defining the interface to interact with various LLM services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a message to the LLM and get a response.
    /// - `messages`: The messages to send in the request.
    /// - `options`: Optional sampling controls (temperature, seed, response format).
    async fn send_message(
        &self,
        messages: &[Message],
        options: Option<SamplingOptions>,
    ) -> Result<Message, ClientError>;

    /// Name of the underlying model, for logging.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* send_message() call.
    /// Default impl returns None so wrappers without accounting don't break.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // ClientWrapper implementations supporting TokenUsage tracking should
        // return a Mutex<Option<TokenUsage>> by overriding this method.
        None
    }
}
