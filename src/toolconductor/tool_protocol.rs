//! Tool Server Protocol Abstraction Layer
//!
//! This module defines the contract between the [`ConnectionManager`](crate::connection_manager::ConnectionManager)
//! and the remote processes that host tools. A tool server is reached through a
//! [`ToolServerConnector`], which opens a [`ToolSession`]: an open, stateful handle that can
//! list the server's tools, invoke them and finally be closed.
//!
//! # Architecture
//!
//! ```text
//! OrchestrationLoop → ConnectionManager → ToolServerConnection → ToolSession (trait)
//!                                                              → [MCP over HTTP | Local | User-defined]
//! ```
//!
//! # Example
//!
//! ```rust
//! use toolconductor::tool_protocol::ToolDescriptor;
//! use serde_json::json;
//!
//! let descriptor = ToolDescriptor::new("add", "Add two numbers").with_input_schema(json!({
//!     "type": "object",
//!     "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
//!     "required": ["a", "b"]
//! }));
//!
//! let definition = descriptor.to_tool_definition();
//! assert_eq!(definition.to_function_schema()["function"]["name"], "add");
//! ```

use crate::client_wrapper::ToolDefinition;
use crate::config::ServerEndpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Metadata about a tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name. Expected to be unique across every registered server.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the accepted arguments (`inputSchema` on the MCP wire).
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    /// Create a descriptor accepting an empty object.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
        }
    }

    /// Replace the argument schema.
    pub fn with_input_schema(mut self, input_schema: serde_json::Value) -> Self {
        self.input_schema = input_schema;
        self
    }

    /// Export the descriptor in the shape the model interface expects.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Represents the result of a tool execution as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Textual result, passed through untouched.
    pub text: String,
    /// Set when the tool itself reported a failure. The text then carries the tool's message.
    pub is_error: bool,
}

impl ToolOutput {
    /// Convenience constructor for successful tool execution.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Convenience constructor for a tool reported failure.
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Error types for tool server operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not known by the server.
    NotFound(String),
    /// The server answered a request with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The request never produced an answer (connection refused, timeout, HTTP failure).
    Transport(String),
    /// The server answered with something that is not a valid protocol message.
    InvalidResponse(String),
    /// The session was already closed.
    Closed,
}

impl ToolError {
    /// Errors that are the server's answer rather than a broken channel.
    ///
    /// Reported errors become tool messages in the conversation; the rest abort the call.
    pub fn is_reported_by_server(&self) -> bool {
        matches!(self, ToolError::NotFound(_) | ToolError::Rpc { .. })
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::Rpc { code, message } => write!(f, "JSON-RPC error {}: {}", code, message),
            ToolError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ToolError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            ToolError::Closed => write!(f, "Session is closed"),
        }
    }
}

impl Error for ToolError {}

/// An open, stateful handle to one tool server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Tools the server currently advertises, in the server's order.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Invoke a tool with decoded JSON arguments.
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Release the session. Calls after the first are no-ops.
    async fn close(&self) -> Result<(), ToolError>;

    /// Protocol identifier (e.g. "mcp-http", "local").
    fn protocol_name(&self) -> &str;

    /// Whether the session can carry several outstanding requests at once.
    ///
    /// When false the owning connection serializes calls to this server.
    fn supports_concurrent_requests(&self) -> bool {
        true
    }
}

/// Opens sessions to tool servers named in the registry.
#[async_trait]
pub trait ToolServerConnector: Send + Sync {
    async fn connect(
        &self,
        server_name: &str,
        endpoint: &ServerEndpoint,
    ) -> Result<Arc<dyn ToolSession>, ToolError>;
}
