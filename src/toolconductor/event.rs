//! Conversation and connection event system.
//!
//! Provides a callback-based observability layer for the orchestration loop and the
//! connection manager. Implement [`EventHandler`] to receive real-time notifications about:
//!
//! - **Model round-trips**: when each turn is sent to the model and what came back
//! - **Tool operations**: dispatch to the owning server, observation, unknown tools
//! - **Turn budget**: when the loop runs out of turns and forces a final answer
//! - **Connections**: servers connecting and closing, catalogs being indexed, shadowed tools
//!
//! # Architecture
//!
//! Events flow through a single [`EventHandler`] trait with two methods:
//! - [`on_conversation_event`](EventHandler::on_conversation_event): receives
//!   [`ConversationEvent`]s from an [`OrchestrationLoop`](crate::orchestration::OrchestrationLoop)
//! - [`on_connection_event`](EventHandler::on_connection_event): receives
//!   [`ConnectionEvent`]s from a [`ConnectionManager`](crate::connection_manager::ConnectionManager)
//!
//! Both methods have default no-op implementations, so you only override what you care about.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolconductor::event::{ConversationEvent, EventHandler};
//! use async_trait::async_trait;
//!
//! struct ToolPrinter;
//!
//! #[async_trait]
//! impl EventHandler for ToolPrinter {
//!     async fn on_conversation_event(&self, event: &ConversationEvent) {
//!         match event {
//!             ConversationEvent::ToolCallDispatched { tool_name, server_name, arguments, .. } => {
//!                 println!("Tool call: `{}` from `{:?}` with {}", tool_name, server_name, arguments);
//!             }
//!             ConversationEvent::ToolCallCompleted { observation, .. } => {
//!                 println!("Observation: {}", observation);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use crate::client_wrapper::TokenUsage;
use async_trait::async_trait;

/// How a single tool call ended from the conversation's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallStatus {
    /// The tool ran and produced output.
    Succeeded,
    /// The tool ran and reported its own failure.
    Failed,
    /// No server advertises the tool.
    NotFound,
    /// The model's argument text was not valid JSON; the tool was not invoked.
    InvalidArguments,
}

/// Events emitted by an [`OrchestrationLoop`](crate::orchestration::OrchestrationLoop)
/// while it resolves one question.
///
/// Every variant carries the `conversation_id` so handlers shared across concurrent
/// conversations can tell them apart.
///
/// # Event Flow (during a typical `resolve()` call)
///
/// ```text
/// ResolveStarted
///   └─ ModelCallStarted { turn: 1, tools_offered: 4 }
///   └─ ModelCallCompleted { turn: 1, tool_calls_requested: 2 }
///   └─ (for each requested tool, in order)
///       ├─ ToolCallDispatched
///       └─ ToolCallCompleted
///   └─ ModelCallStarted { turn: 2 } ...
///   └─ (if the budget runs out)
///       ├─ TurnLimitReached
///       ├─ ModelCallStarted { tools_offered: 0 }
///       └─ ModelCallCompleted
/// ResolveCompleted
/// ```
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Fired at the start of `resolve()`.
    ResolveStarted {
        conversation_id: String,
        /// First ~120 characters of the question, useful for logging.
        question_preview: String,
    },

    /// Fired **before** each model round-trip.
    ModelCallStarted {
        conversation_id: String,
        /// 1-based model call counter. The forced completion is `max_turns + 1`.
        turn: usize,
        /// Number of tool schemas offered. Zero on the forced completion.
        tools_offered: usize,
    },

    /// Fired **after** each model round-trip completes.
    ModelCallCompleted {
        conversation_id: String,
        turn: usize,
        /// Tool calls the model asked for. Zero means the response is the answer.
        tool_calls_requested: usize,
        /// Usage reported by the client for this call, if any.
        tokens_used: Option<TokenUsage>,
        /// Character length of the response text.
        response_length: usize,
    },

    /// Fired before a tool call is handed to the connection manager.
    ToolCallDispatched {
        conversation_id: String,
        turn: usize,
        call_id: String,
        tool_name: String,
        /// Owning server according to the tool index, `None` for unknown tools.
        server_name: Option<String>,
        /// Raw argument text from the model.
        arguments: String,
    },

    /// Fired once the tool message for a call has been appended.
    ToolCallCompleted {
        conversation_id: String,
        turn: usize,
        call_id: String,
        tool_name: String,
        status: ToolCallStatus,
        /// Content of the tool message fed back to the model.
        observation: String,
    },

    /// Fired when every turn requested tools and the forced completion is about to run.
    TurnLimitReached {
        conversation_id: String,
        max_turns: usize,
    },

    /// Fired when `resolve()` returns an answer.
    ResolveCompleted {
        conversation_id: String,
        /// Total model calls, forced completion included.
        model_calls: usize,
        /// Total tool calls processed, unknown and malformed ones included.
        tool_calls_made: usize,
        /// Whether the answer came from the forced completion.
        forced: bool,
        response_length: usize,
    },
}

/// Events emitted by a [`ConnectionManager`](crate::connection_manager::ConnectionManager).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A session was opened during `initialize()`.
    ServerConnected {
        server_name: String,
        protocol: String,
    },

    /// A server's catalog was merged into the tool index.
    ToolsIndexed {
        server_name: String,
        tool_count: usize,
    },

    /// A tool name was advertised by two servers; `winner` now owns it.
    ToolShadowed {
        tool_name: String,
        previous_server: String,
        winner: String,
    },

    /// A session was released. `error` carries the close failure, if any.
    ServerClosed {
        server_name: String,
        error: Option<String>,
    },
}

/// Trait for receiving conversation and connection events.
///
/// Both methods have **default no-op implementations**.
///
/// # Thread Safety
///
/// The `Send + Sync` bound allows the handler to be shared across conversations and tokio
/// tasks via `Arc<dyn EventHandler>`. Keep internal state behind appropriate
/// synchronization (e.g., `AtomicUsize`, `Mutex`).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when an orchestration loop emits an event.
    async fn on_conversation_event(&self, _event: &ConversationEvent) {}

    /// Called when the connection manager emits an event.
    async fn on_connection_event(&self, _event: &ConnectionEvent) {}
}
