use crate::client_wrapper::{Message, NativeToolCall, Role, TokenUsage, ToolDefinition};
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// HTTP client shared by every chat client so connections are pooled process-wide.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
}

/// Get the shared HTTP client.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Render one message in the OpenAI chat format.
pub fn format_message(message: &Message) -> JsonValue {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            let tool_calls: Vec<JsonValue> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments}
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                JsonValue::Null
            } else {
                JsonValue::String(message.content.to_string())
            };
            json!({"role": "assistant", "content": content, "tool_calls": tool_calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": &*message.content,
        }),
        _ => json!({"role": message.role.as_str(), "content": &*message.content}),
    }
}

/// Build a `/chat/completions` request body.
pub fn chat_request_body(
    model: &str,
    messages: &[Message],
    tools: Option<&[ToolDefinition]>,
) -> JsonValue {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(format_message).collect::<Vec<_>>(),
    });
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        body["tools"] = tools
            .iter()
            .map(ToolDefinition::to_function_schema)
            .collect::<Vec<_>>()
            .into();
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

/// Turn a `/chat/completions` response body into the assistant message and its usage.
///
/// Tool calls are only surfaced when the model stopped with `finish_reason == "tool_calls"`.
pub fn parse_chat_response(
    body: &str,
) -> Result<(Message, Option<TokenUsage>), Box<dyn Error + Send + Sync>> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let usage = response.usage.map(|u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or("chat response contained no choices")?;
    let content = choice.message.content.unwrap_or_default();

    let message = if choice.finish_reason.as_deref() == Some("tool_calls") {
        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| NativeToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();
        Message::assistant_with_tool_calls(content, calls)
    } else {
        Message::new(Role::Assistant, content)
    };
    Ok((message, usage))
}

/// Send a chat request, record its usage, and return the assistant message.
pub async fn send_and_track(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &JsonValue,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error + Send + Sync>> {
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            log::error!("chat request to {} failed: {}", url, e);
            e
        })?;

    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        log::error!("chat API error {}: {}", status, text);
        return Err(format!("chat API returned {}: {}", status, text).into());
    }

    let (message, usage) = parse_chat_response(&text)?;
    *usage_slot.lock().await = usage;
    Ok(message)
}
