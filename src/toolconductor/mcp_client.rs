//! MCP client over HTTP
//!
//! [`McpHttpSession`] is a Model Context Protocol client session built on `rmcp`. Two HTTP
//! transports are supported, chosen by [`ServerEndpoint::transport`]:
//!
//! * **Streamable HTTP**: every message is a `POST` to one endpoint, answered with JSON or an
//!   event stream. A server issued `Mcp-Session-Id` is echoed on later requests.
//! * **Legacy SSE**: a long-lived `GET` event stream announces a message endpoint; requests are
//!   `POST`ed there and their responses come back over the stream.
//!
//! With [`McpTransport::Auto`] a URL whose path ends in `/sse` selects legacy SSE.
//!
//! # Lifecycle
//!
//! ```text
//! connect ─► initialize ─► notifications/initialized ─► tools/list* ─► tools/call* ─► close
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use toolconductor::config::ServerEndpoint;
//! use toolconductor::mcp_client::McpHttpSession;
//! use toolconductor::tool_protocol::ToolSession;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = McpHttpSession::open(&ServerEndpoint::new("http://localhost:8000/sse")).await?;
//! for tool in session.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{McpTransport, ServerEndpoint};
use crate::tool_protocol::{
    ToolDescriptor, ToolError, ToolOutput, ToolServerConnector, ToolSession,
};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, JsonObject, Tool};
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type McpClient = RunningService<RoleClient, ()>;

/// Connector opening [`McpHttpSession`]s for registry entries.
#[derive(Debug, Default, Clone)]
pub struct McpHttpConnector;

impl McpHttpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolServerConnector for McpHttpConnector {
    async fn connect(
        &self,
        server_name: &str,
        endpoint: &ServerEndpoint,
    ) -> Result<Arc<dyn ToolSession>, ToolError> {
        log::debug!("connecting to '{}' at {}", server_name, endpoint.url);
        let session = McpHttpSession::open(endpoint).await?;
        Ok(Arc::new(session))
    }
}

/// An initialized MCP session over streamable HTTP or legacy SSE.
pub struct McpHttpSession {
    endpoint: String,
    transport: McpTransport,
    timeout: Duration,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpClient>>,
    closed: AtomicBool,
    instructions: Option<String>,
}

impl McpHttpSession {
    /// Connect and run the `initialize` handshake.
    pub async fn open(endpoint: &ServerEndpoint) -> Result<Self, ToolError> {
        let timeout = Duration::from_secs(endpoint.timeout_secs);
        // No overall request timeout: the SSE stream stays open for the whole session.
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ToolError::Transport(format!("failed to build HTTP client: {}", e)))?;
        let transport = endpoint.transport.resolve(&endpoint.url);

        let handshake = async {
            let service = match transport {
                McpTransport::Sse => {
                    let config = SseClientConfig {
                        sse_endpoint: endpoint.url.clone().into(),
                        ..Default::default()
                    };
                    let transport = SseClientTransport::start_with_client(http, config)
                        .await
                        .map_err(|e| {
                            ToolError::Transport(format!("failed to open SSE stream: {}", e))
                        })?;
                    ().serve(transport).await.map_err(|e| {
                        ToolError::Transport(format!("SSE handshake failed: {}", e))
                    })?
                }
                _ => {
                    let config =
                        StreamableHttpClientTransportConfig::with_uri(endpoint.url.as_str());
                    let transport = StreamableHttpClientTransport::with_client(http, config);
                    ().serve(transport).await.map_err(|e| {
                        ToolError::Transport(format!("streamable HTTP handshake failed: {}", e))
                    })?
                }
            };
            Ok::<McpClient, ToolError>(service)
        };
        let service = within(timeout, "initialize", handshake).await?;

        let instructions = service
            .peer_info()
            .and_then(|info| info.instructions.clone());
        Ok(Self {
            endpoint: endpoint.url.clone(),
            transport,
            timeout,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
            instructions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Transport in use, never [`McpTransport::Auto`].
    pub fn transport(&self) -> McpTransport {
        self.transport
    }

    /// Usage instructions the server sent during the handshake.
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    fn open_peer(&self) -> Result<&Peer<RoleClient>, ToolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolError::Closed);
        }
        Ok(&self.peer)
    }
}

/// Bound one round trip by the endpoint timeout.
async fn within<T, F>(timeout: Duration, what: &str, request: F) -> Result<T, ToolError>
where
    F: Future<Output = Result<T, ToolError>>,
{
    tokio::time::timeout(timeout, request).await.map_err(|_| {
        ToolError::Transport(format!("{} timed out after {:?}", what, timeout))
    })?
}

/// JSON-RPC errors are the server's answer; everything else is a broken channel.
fn tool_error_from_service(error: ServiceError) -> ToolError {
    match error {
        ServiceError::McpError(error) => ToolError::Rpc {
            code: i64::from(error.code.0),
            message: error.message.to_string(),
        },
        other => ToolError::Transport(other.to_string()),
    }
}

fn descriptor_from_tool(tool: Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name.to_string(),
        description: tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        input_schema: JsonValue::Object((*tool.input_schema).clone()),
    }
}

/// Flatten a `tools/call` result into text.
///
/// Text content items are joined with newlines; when there are none the structured content is
/// serialized instead.
fn tool_output_from_result(result: &JsonValue) -> ToolOutput {
    let is_error = result
        .get("isError")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    let texts: Vec<&str> = result
        .get("content")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(JsonValue::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(JsonValue::as_str))
                .collect()
        })
        .unwrap_or_default();

    let text = if texts.is_empty() {
        result
            .get("structuredContent")
            .map(JsonValue::to_string)
            .unwrap_or_default()
    } else {
        texts.join("\n")
    };

    ToolOutput { text, is_error }
}

#[async_trait]
impl ToolSession for McpHttpSession {
    /// Every page of the catalog; `rmcp` follows `nextCursor`.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let peer = self.open_peer()?;
        let tools = within(self.timeout, "tools/list", async {
            peer.list_all_tools().await.map_err(tool_error_from_service)
        })
        .await?;
        Ok(tools.into_iter().map(descriptor_from_tool).collect())
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<ToolOutput, ToolError> {
        let peer = self.open_peer()?;
        let arguments: JsonObject = match arguments {
            JsonValue::Null => JsonObject::new(),
            JsonValue::Object(map) => map,
            other => {
                return Err(ToolError::Rpc {
                    code: -32602,
                    message: format!(
                        "Arguments for tool '{}' must be a JSON object, got {}",
                        tool_name, other
                    ),
                })
            }
        };
        let request = CallToolRequestParam {
            name: Cow::Owned(tool_name.to_string()),
            arguments: Some(arguments),
        };

        let result = within(self.timeout, "tools/call", async {
            peer.call_tool(request).await.map_err(tool_error_from_service)
        })
        .await?;
        let result = serde_json::to_value(&result)
            .map_err(|e| ToolError::InvalidResponse(format!("unreadable tool result: {}", e)))?;
        Ok(tool_output_from_result(&result))
    }

    async fn close(&self) -> Result<(), ToolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let service = self.service.lock().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| ToolError::Transport(format!("session shutdown failed: {}", e)))?;
        }
        Ok(())
    }

    fn protocol_name(&self) -> &str {
        match self.transport {
            McpTransport::Sse => "mcp-sse",
            _ => "mcp-http",
        }
    }
}
