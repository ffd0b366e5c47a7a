//! # toolconductor
//!
//! toolconductor lets a language model call tools hosted on one or more named tool servers
//! and resolves multi-turn tool-calling conversations against it.
//!
//! The crate provides layered abstractions for:
//!
//! * **Connection management**: [`ConnectionManager`] opens one session per configured server,
//!   merges their catalogs into a single tool namespace and routes every call to the server
//!   that owns the tool
//! * **Bounded orchestration**: [`OrchestrationLoop`] alternates model calls with tool
//!   executions for at most `max_turns` rounds, then forces a plain answer
//! * **Tool servers**: [`mcp_client::McpHttpConnector`] speaks MCP over streamable HTTP or
//!   legacy SSE;
//!   [`tool_protocols::LocalToolServer`] hosts Rust closures in-process
//! * **Model clients**: the [`ClientWrapper`] trait, implemented for OpenAI compatible chat
//!   APIs by [`clients::openai::OpenAIClient`]
//! * **Observability**: `log` records plus the [`EventHandler`] callback trait
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolconductor::clients::openai::{Model, OpenAIClient};
//! use toolconductor::config::{ConductorConfig, ServerEndpoint, ServerRegistry};
//! use toolconductor::mcp_client::McpHttpConnector;
//! use toolconductor::{ConnectionManager, OrchestrationLoop};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     toolconductor::init_logger();
//!
//!     let servers = ServerRegistry::builder()
//!         .server("hr", ServerEndpoint::new("http://localhost:8000/sse"))
//!         .server("docs", ServerEndpoint::new("http://localhost:8001/mcp"))
//!         .build()?;
//!     let config = ConductorConfig::new(servers);
//!
//!     let manager = ConnectionManager::start(
//!         config.servers.clone(),
//!         Arc::new(McpHttpConnector::new()),
//!         None,
//!     )
//!     .await?;
//!     let client = Arc::new(OpenAIClient::new_with_model_enum(
//!         &std::env::var("OPEN_AI_SECRET")?,
//!         Model::GPT4oMini,
//!     ));
//!
//!     let answer = manager
//!         .scope(|manager| async move {
//!             OrchestrationLoop::from_config(client, manager, &config)
//!                 .resolve("Which documents mention the travel policy?")
//!                 .await
//!         })
//!         .await?;
//!
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Library code never installs a logger on its own; applications call this to opt in to
/// `RUST_LOG` driven diagnostics.
///
/// ```rust
/// toolconductor::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `toolconductor` module.
pub mod toolconductor;

// Re-exporting key items for easier external access.
pub use toolconductor::client_wrapper;
pub use toolconductor::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
pub use toolconductor::clients;
pub use toolconductor::config;
pub use toolconductor::config::{ConductorConfig, McpTransport, ServerEndpoint, ServerRegistry};
pub use toolconductor::connection_manager;
pub use toolconductor::connection_manager::{
    ConnectionError, ConnectionManager, ManagerState, ToolCallOutcome,
};
pub use toolconductor::event;
pub use toolconductor::event::{ConnectionEvent, ConversationEvent, EventHandler};
pub use toolconductor::mcp_client;
pub use toolconductor::orchestration;
pub use toolconductor::orchestration::{OrchestrationError, OrchestrationLoop, Resolution};
pub use toolconductor::tool_protocol;
pub use toolconductor::tool_protocol::{ToolDescriptor, ToolError, ToolOutput};
pub use toolconductor::tool_protocols;
pub use toolconductor::tool_server_connection;
