//! The `OpenAIClient` struct implements `ClientWrapper` for OpenAI's Chat Completions API and
//! any OpenAI compatible endpoint, including native tool calling.
//!
//! # Key Features
//!
//! - **Tool calling**: offered [`ToolDefinition`]s are sent as `tools`; a response that stops
//!   with `finish_reason == "tool_calls"` comes back as a [`Message`] with `tool_calls`.
//! - **Tool history**: assistant tool-call messages and `tool` role observations are
//!   serialized so the model sees the whole exchange.
//! - **Automatic Usage Capture**: the latest `TokenUsage` is kept and exposed through
//!   `get_last_usage()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolconductor::clients::openai::{Model, OpenAIClient};
//! use toolconductor::client_wrapper::{ClientWrapper, Message, Role};
//!
//! #[tokio::main]
//! async fn main() {
//!     let secret_key: String = std::env::var("OPEN_AI_SECRET").unwrap_or_default();
//!     let client = OpenAIClient::new_with_model_enum(&secret_key, Model::GPT4oMini);
//!
//!     let resp = client
//!         .send_message(
//!             &[
//!                 Message::new(Role::System, "You are an assistant."),
//!                 Message::new(Role::User, "Hello!"),
//!             ],
//!             None,
//!         )
//!         .await
//!         .unwrap();
//!     println!("Assistant: {}", resp.content);
//!
//!     if let Some(usage) = client.get_last_usage().await {
//!         println!("Tokens: {} in, {} out", usage.input_tokens, usage.output_tokens);
//!     }
//! }
//! ```
use std::error::Error;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client_wrapper::{ClientWrapper, Message, TokenUsage, ToolDefinition};
use crate::clients::common::{chat_request_body, get_shared_http_client, send_and_track};

/// Default OpenAI API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model identifiers commonly used for tool calling.
pub enum Model {
    /// `gpt-4o`
    GPT4o,
    /// `gpt-4o-mini`
    GPT4oMini,
    /// `gpt-4.1`
    GPT41,
    /// `gpt-4.1-mini`
    GPT41Mini,
    /// `gpt-4.1-nano`
    GPT41Nano,
}

/// Convert a [`Model`] variant into the string identifier expected by the REST API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::GPT4o => "gpt-4o".to_string(),
        Model::GPT4oMini => "gpt-4o-mini".to_string(),
        Model::GPT41 => "gpt-4.1".to_string(),
        Model::GPT41Mini => "gpt-4.1-mini".to_string(),
        Model::GPT41Nano => "gpt-4.1-nano".to_string(),
    }
}

/// Client wrapper for OpenAI compatible Chat Completions APIs.
pub struct OpenAIClient {
    http: reqwest::Client,
    /// API root without the trailing `/chat/completions`.
    base_url: String,
    api_key: String,
    model: String,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Client for api.openai.com with an explicit model name.
    pub fn new(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, DEFAULT_BASE_URL)
    }

    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new(secret_key, &model_to_string(model))
    }

    /// Construct a client targeting a custom OpenAI compatible base URL
    /// (e.g. `http://localhost:11434/v1`).
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            http: get_shared_http_client().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: secret_key.to_string(),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let body = chat_request_body(&self.model, messages, tools.as_deref());
        let url = format!("{}/chat/completions", self.base_url);
        log::debug!(
            "OpenAIClient::send_message: {} messages, {} tools to {}",
            messages.len(),
            tools.as_ref().map_or(0, Vec::len),
            self.model
        );
        send_and_track(&self.http, &url, &self.api_key, &body, &self.token_usage).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
