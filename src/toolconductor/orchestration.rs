//! Bounded tool-calling conversations.
//!
//! An [`OrchestrationLoop`] answers one user question at a time by alternating model calls
//! with tool executions routed through a shared
//! [`ConnectionManager`](crate::connection_manager::ConnectionManager):
//!
//! ```text
//! [system, user] ──► model ──► answer?  ──yes──► return
//!                      ▲          │no
//!                      │          ▼
//!                      └── tool messages (in request order)
//!
//! after max_turns rounds that all asked for tools:
//!                      model (no tools offered) ──► return
//! ```
//!
//! Unknown tools and malformed arguments become tool messages the model can react to. A
//! broken connection to a tool server, or a failing model call, ends the conversation with
//! an [`OrchestrationError`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolconductor::clients::openai::OpenAIClient;
//! use toolconductor::config::{ConductorConfig, ServerEndpoint, ServerRegistry};
//! use toolconductor::connection_manager::ConnectionManager;
//! use toolconductor::mcp_client::McpHttpConnector;
//! use toolconductor::orchestration::OrchestrationLoop;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let servers = ServerRegistry::builder()
//!     .server("hr", ServerEndpoint::new("http://localhost:8000/mcp"))
//!     .build()?;
//! let config = ConductorConfig::new(servers);
//!
//! let manager = ConnectionManager::start(
//!     config.servers.clone(),
//!     Arc::new(McpHttpConnector::new()),
//!     None,
//! )
//! .await?;
//! let client = Arc::new(OpenAIClient::new("sk-...", "gpt-4o-mini"));
//!
//! let answer = manager
//!     .scope(|manager| async move {
//!         let conductor = OrchestrationLoop::from_config(client, manager, &config);
//!         conductor.resolve("How many vacation days do I have left?").await
//!     })
//!     .await?;
//! println!("{}", answer);
//! # Ok(())
//! # }
//! ```

use crate::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, ToolDefinition};
use crate::config::{ConductorConfig, DEFAULT_MAX_TURNS, DEFAULT_SYSTEM_PROMPT};
use crate::connection_manager::{ConnectionError, ConnectionManager, ToolCallOutcome};
use crate::event::{ConversationEvent, EventHandler, ToolCallStatus};
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Append-only message list for one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    /// Conversation seeded with the system instruction and the user question.
    pub fn seeded(system_prompt: &str, question: &str) -> Self {
        Self {
            messages: vec![
                Message::new(Role::System, system_prompt),
                Message::new(Role::User, question),
            ],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Tool observations, in the order they were appended.
    pub fn tool_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Tool)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Answer plus the bookkeeping of the conversation that produced it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub conversation_id: String,
    pub answer: String,
    /// Messages exchanged before the answer. The answer itself is not appended.
    pub conversation: ConversationState,
    /// Model calls made, forced completion included.
    pub model_calls: usize,
    /// Tool calls processed, unknown and malformed ones included.
    pub tool_calls_made: usize,
    /// True when the answer came from the forced completion.
    pub forced: bool,
}

#[derive(Debug)]
pub enum OrchestrationError {
    /// The model client failed.
    ModelCall(String),
    /// A tool server connection broke mid-call.
    Transport(ConnectionError),
    /// `resolve_within` ran out of time.
    TimedOut(Duration),
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::ModelCall(msg) => write!(f, "Model call failed: {}", msg),
            OrchestrationError::Transport(err) => write!(f, "Tool transport failed: {}", err),
            OrchestrationError::TimedOut(after) => {
                write!(f, "Conversation timed out after {:?}", after)
            }
        }
    }
}

impl Error for OrchestrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestrationError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConnectionError> for OrchestrationError {
    fn from(err: ConnectionError) -> Self {
        OrchestrationError::Transport(err)
    }
}

/// Decode the model's argument text. Blank text means "no arguments".
fn decode_arguments(raw: &str) -> Result<JsonValue, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

/// Drives one question to an answer through the model and the tool servers.
///
/// Cheap to share: every conversation gets its own [`ConversationState`], so one loop can
/// serve concurrent `resolve()` calls.
pub struct OrchestrationLoop {
    client: Arc<dyn ClientWrapper>,
    manager: Arc<ConnectionManager>,
    max_turns: usize,
    system_prompt: String,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl OrchestrationLoop {
    /// Loop with the default turn budget and system prompt.
    pub fn new(client: Arc<dyn ClientWrapper>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            client,
            manager,
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            event_handler: None,
        }
    }

    pub fn from_config(
        client: Arc<dyn ClientWrapper>,
        manager: Arc<ConnectionManager>,
        config: &ConductorConfig,
    ) -> Self {
        Self::new(client, manager)
            .with_max_turns(config.max_turns)
            .with_system_prompt(config.system_prompt.clone())
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    async fn emit(&self, event: ConversationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_conversation_event(&event).await;
        }
    }

    /// Answer `question`.
    pub async fn resolve(&self, question: &str) -> Result<String, OrchestrationError> {
        self.resolve_with_transcript(question)
            .await
            .map(|resolution| resolution.answer)
    }

    /// Like [`resolve`](Self::resolve) but gives up after `timeout`.
    ///
    /// On expiry the in-flight conversation is dropped. Closing the manager is left to
    /// [`ConnectionManager::scope`].
    pub async fn resolve_within(
        &self,
        question: &str,
        timeout: Duration,
    ) -> Result<String, OrchestrationError> {
        match tokio::time::timeout(timeout, self.resolve(question)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("conversation timed out after {:?}", timeout);
                Err(OrchestrationError::TimedOut(timeout))
            }
        }
    }

    /// Answer `question` and keep the conversation that led there.
    pub async fn resolve_with_transcript(
        &self,
        question: &str,
    ) -> Result<Resolution, OrchestrationError> {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        self.emit(ConversationEvent::ResolveStarted {
            conversation_id: conversation_id.clone(),
            question_preview: preview(question),
        })
        .await;

        let tools = self.manager.tool_definitions().await;
        let mut state = ConversationState::seeded(&self.system_prompt, question);
        let mut model_calls = 0;
        let mut tool_calls_made = 0;

        for turn in 1..=self.max_turns {
            model_calls += 1;
            let response = self
                .call_model(&conversation_id, turn, &state, Some(tools.clone()))
                .await?;

            if !response.requests_tools() {
                return Ok(self
                    .finish(
                        conversation_id,
                        response,
                        state,
                        model_calls,
                        tool_calls_made,
                        false,
                    )
                    .await);
            }

            let calls = response.tool_calls.clone();
            state.push(response);
            for call in &calls {
                let content = self.run_tool_call(&conversation_id, turn, call).await?;
                state.push(Message::tool_result(call.id.clone(), content));
                tool_calls_made += 1;
            }
        }

        log::info!(
            "turn budget of {} exhausted, forcing a final answer",
            self.max_turns
        );
        self.emit(ConversationEvent::TurnLimitReached {
            conversation_id: conversation_id.clone(),
            max_turns: self.max_turns,
        })
        .await;

        model_calls += 1;
        let response = self
            .call_model(&conversation_id, self.max_turns + 1, &state, None)
            .await?;
        Ok(self
            .finish(
                conversation_id,
                response,
                state,
                model_calls,
                tool_calls_made,
                true,
            )
            .await)
    }

    async fn call_model(
        &self,
        conversation_id: &str,
        turn: usize,
        state: &ConversationState,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, OrchestrationError> {
        self.emit(ConversationEvent::ModelCallStarted {
            conversation_id: conversation_id.to_string(),
            turn,
            tools_offered: tools.as_ref().map_or(0, Vec::len),
        })
        .await;

        let response = self
            .client
            .send_message(state.messages(), tools)
            .await
            .map_err(|e| {
                log::error!("model '{}' failed: {}", self.client.model_name(), e);
                OrchestrationError::ModelCall(e.to_string())
            })?;

        self.emit(ConversationEvent::ModelCallCompleted {
            conversation_id: conversation_id.to_string(),
            turn,
            tool_calls_requested: response.tool_calls.len(),
            tokens_used: self.client.get_last_usage().await,
            response_length: response.content.len(),
        })
        .await;
        Ok(response)
    }

    /// Execute one requested call and produce the tool message content.
    async fn run_tool_call(
        &self,
        conversation_id: &str,
        turn: usize,
        call: &NativeToolCall,
    ) -> Result<String, OrchestrationError> {
        let server_name = self.manager.server_for(&call.name).await;
        log::debug!(
            "tool call '{}' on {:?} with {}",
            call.name,
            server_name,
            call.arguments
        );
        self.emit(ConversationEvent::ToolCallDispatched {
            conversation_id: conversation_id.to_string(),
            turn,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            server_name,
            arguments: call.arguments.clone(),
        })
        .await;

        let (status, content) = match decode_arguments(&call.arguments) {
            Err(err) => {
                log::warn!("invalid arguments for '{}': {}", call.name, err);
                (
                    ToolCallStatus::InvalidArguments,
                    format!("Invalid JSON arguments for tool '{}': {}", call.name, err),
                )
            }
            Ok(arguments) => match self.manager.call_tool(&call.name, arguments).await? {
                ToolCallOutcome::Output(output) => {
                    let status = if output.is_error {
                        ToolCallStatus::Failed
                    } else {
                        ToolCallStatus::Succeeded
                    };
                    (status, output.text)
                }
                outcome @ ToolCallOutcome::NotFound(_) => {
                    (ToolCallStatus::NotFound, outcome.into_content())
                }
            },
        };
        log::debug!("observation from '{}': {}", call.name, content);

        self.emit(ConversationEvent::ToolCallCompleted {
            conversation_id: conversation_id.to_string(),
            turn,
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            observation: content.clone(),
        })
        .await;
        Ok(content)
    }

    async fn finish(
        &self,
        conversation_id: String,
        response: Message,
        conversation: ConversationState,
        model_calls: usize,
        tool_calls_made: usize,
        forced: bool,
    ) -> Resolution {
        let answer = response.content.to_string();
        self.emit(ConversationEvent::ResolveCompleted {
            conversation_id: conversation_id.clone(),
            model_calls,
            tool_calls_made,
            forced,
            response_length: answer.len(),
        })
        .await;
        Resolution {
            conversation_id,
            answer,
            conversation,
            model_calls,
            tool_calls_made,
            forced,
        }
    }
}
