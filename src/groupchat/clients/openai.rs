//! The `OpenAIClient` struct implements [`ClientWrapper`] for OpenAI-compatible
//! Chat Completions endpoints, capturing both the assistant response and token
//! usage (input vs output) for cost tracking.
//!
//! Unlike a generic chat wrapper, this client forwards the full set of
//! [`SamplingOptions`]: `temperature`, `seed`, and a JSON response format.
//! The turn-taking classifiers depend on those knobs being wired all the way
//! through to the request body, so the request is built by hand with
//! `serde_json` rather than through an SDK that hides them.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupchat::client_wrapper::{ClientWrapper, Message, Role};
//! use groupchat::clients::openai::OpenAIClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = OpenAIClient::new("api-key", "gpt-4.1-mini");
//!
//! let reply = client
//!     .send_message(
//!         &[
//!             Message { role: Role::System, content: "You are terse.".into() },
//!             Message { role: Role::User, content: "Say hello.".into() },
//!         ],
//!         None,
//!     )
//!     .await?;
//!
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::groupchat::client_wrapper::{
    ClientError, ClientWrapper, Message, Role, SamplingOptions, TokenUsage,
};
use crate::groupchat::clients::get_shared_http_client;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client wrapper for OpenAI-compatible Chat Completions APIs.
///
/// The wrapper maintains the selected model identifier plus an internal
/// [`TokenUsage`] slot so callers can inspect how many tokens each request
/// consumed. It reuses the process-shared HTTP client from
/// [`crate::clients`].
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    model: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl OpenAIClient {
    /// Construct a new client using the provided API key and model name
    /// against the official OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Construct a client targeting a custom OpenAI-compatible base URL
    /// (e.g. Azure deployments or self-hosted endpoints).
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        OpenAIClient {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    fn role_to_string(role: &Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
        options: Option<SamplingOptions>,
    ) -> Result<Message, ClientError> {
        let formatted: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": Self::role_to_string(&msg.role),
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": formatted,
        });

        if let Some(opts) = options {
            if let Some(temperature) = opts.temperature {
                body["temperature"] = json!(temperature);
            }
            if let Some(seed) = opts.seed {
                body["seed"] = json!(seed);
            }
            if opts.json_output {
                body["response_format"] = json!({ "type": "json_object" });
            }
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = get_shared_http_client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                log::error!("OpenAIClient::send_message(...): request error: {}", err);
                Box::new(err) as ClientError
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAIClient::send_message(...): API error {}: {}",
                status,
                detail
            );
            return Err(format!("OpenAI API error {}: {}", status, detail).into());
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            log::error!("OpenAIClient::send_message(...): decode error: {}", err);
            Box::new(err) as ClientError
        })?;

        if let Some(usage) = parsed.usage {
            if let Ok(mut slot) = self.token_usage.lock() {
                *slot = Some(TokenUsage {
                    input_tokens: usage.prompt_tokens as usize,
                    output_tokens: usage.completion_tokens as usize,
                    total_tokens: usage.total_tokens as usize,
                });
            }
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| -> ClientError { "OpenAI API returned no choices".into() })?;

        Ok(Message {
            role: Role::Assistant,
            content,
        })
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
