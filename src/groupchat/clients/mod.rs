// src/groupchat/clients/mod.rs

pub mod openai;

use lazy_static::lazy_static;

lazy_static! {
    /// Process-wide HTTP client shared by every [`OpenAIClient`](openai::OpenAIClient)
    /// and the OpenAPI tool protocol, so connection pools are reused across agents.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::new();
}

/// Returns the shared HTTP client used by all LLM clients in this process.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
