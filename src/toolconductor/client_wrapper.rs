use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A ClientWrapper is a wrapper around a specific cloud LLM service.
/// It provides a common interface to interact with the LLMs.
/// It does not keep track of the conversation, for that the
/// [`OrchestrationLoop`](crate::orchestration::OrchestrationLoop) owns a
/// [`ConversationState`](crate::orchestration::ConversationState) per question
/// and hands the full message list to the ClientWrapper on every turn.
// src/client_wrapper

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    // set by the developer to steer the model's responses
    User,
    // a message sent by a human user (or app user)
    Assistant,
    // lets the model know the content was generated as a response to a user message
    Tool,
    // the observation produced by a tool call, correlated through `tool_call_id`
}

impl Role {
    /// Wire name used by OpenAI compatible chat APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A tool invocation requested by the model.
///
/// `arguments` is kept as the raw text the model produced. Decoding happens per call inside
/// the orchestration loop so a malformed payload only fails that one call.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeToolCall {
    /// Provider issued identifier echoed back in the matching tool message.
    pub id: String,
    /// Name of the tool, resolved against the connection manager's tool index.
    pub name: String,
    /// Raw JSON argument text.
    pub arguments: String,
}

/// A tool advertised to the model, rendered as an OpenAI style function schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema describing the accepted arguments.
    pub parameters: JsonValue,
}

impl ToolDefinition {
    /// Render as `{"type": "function", "function": {name, description, parameters}}`.
    pub fn to_function_schema(&self) -> JsonValue {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: Arc<str>,
    /// Tool calls requested by an assistant message. Empty for every other role.
    pub tool_calls: Vec<NativeToolCall>,
    /// For [`Role::Tool`] messages, the id of the call this message answers.
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Plain message without tool metadata.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant message carrying the tool calls the model asked for.
    pub fn assistant_with_tool_calls(
        content: impl Into<Arc<str>>,
        tool_calls: Vec<NativeToolCall>,
    ) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool observation answering the call identified by `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// True when the model wants tools executed before it answers.
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Trait defining the interface to interact with various LLM services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the conversation to the LLM and get the assistant's reply.
    /// - `messages`: the full conversation so far.
    /// - `tools`: tool definitions the model may call. `None` forces a text answer.
    ///
    /// The returned message has non-empty `tool_calls` exactly when the model stopped to
    /// request tools.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Model identifier used for logging.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* send_message() call.
    /// Default impl reads the slot exposed by [`ClientWrapper::usage_slot`].
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        match self.usage_slot() {
            Some(slot) => slot.lock().await.clone(),
            None => None,
        }
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // ClientWrapper implementations supporting TokenUsage tracking should return a Mutex<Option<TokenUsage>> by overriding this method.
        None
    }
}
