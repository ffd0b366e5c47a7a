//! In-process Tool Servers
//!
//! [`LocalToolServer`] hosts tools implemented as Rust closures (sync and async) behind the
//! same [`ToolSession`] contract a remote MCP server satisfies, and [`LocalConnector`] hands
//! such servers to a [`ConnectionManager`](crate::connection_manager::ConnectionManager)
//! by name. This is the embedding path for tools that live in the host process, and the
//! backbone of the crate's tests.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use toolconductor::tool_protocol::{ToolDescriptor, ToolOutput};
//! use toolconductor::tool_protocols::{LocalConnector, LocalToolServer};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let server = Arc::new(LocalToolServer::new());
//! server
//!     .register_tool(
//!         ToolDescriptor::new("echo", "Echo the text argument"),
//!         Arc::new(|args| Ok(ToolOutput::success(args["text"].as_str().unwrap_or("")))),
//!     )
//!     .await;
//!
//! let connector = LocalConnector::new().with_server("local", server);
//! # let _ = connector;
//! # }
//! ```

use crate::config::ServerEndpoint;
use crate::tool_protocol::{
    ToolDescriptor, ToolError, ToolOutput, ToolServerConnector, ToolSession,
};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type alias for synchronous tool functions exposed via the local server.
pub type ToolFunction = Arc<dyn Fn(JsonValue) -> Result<ToolOutput, ToolError> + Send + Sync>;

/// Type alias for asynchronous tool functions exposed via the local server.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<ToolOutput, ToolError>> + Send>,
        > + Send
        + Sync,
>;

/// A tool server living inside the current process.
///
/// Tools are listed in registration order. Registering a name twice replaces the earlier
/// tool but keeps its position.
pub struct LocalToolServer {
    tools: Arc<RwLock<Vec<ToolDescriptor>>>,
    sync_functions: Arc<RwLock<HashMap<String, ToolFunction>>>,
    async_functions: Arc<RwLock<HashMap<String, AsyncToolFunction>>>,
}

impl LocalToolServer {
    /// Create an empty server ready to accept new tool registrations.
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(Vec::new())),
            sync_functions: Arc::new(RwLock::new(HashMap::new())),
            async_functions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A server preloaded with the sample tools `add` and `get_current_temperature_by_city`.
    pub async fn with_demo_tools() -> Self {
        let server = Self::new();
        server
            .register_tool(
                ToolDescriptor::new("add", "Add two numbers").with_input_schema(json!({
                    "type": "object",
                    "properties": {
                        "a": {"type": "integer"},
                        "b": {"type": "integer"}
                    },
                    "required": ["a", "b"]
                })),
                Arc::new(|args| {
                    let a = args["a"].as_i64().ok_or_else(|| ToolError::Rpc {
                        code: -32602,
                        message: "'a' must be an integer".to_string(),
                    })?;
                    let b = args["b"].as_i64().ok_or_else(|| ToolError::Rpc {
                        code: -32602,
                        message: "'b' must be an integer".to_string(),
                    })?;
                    let sum = a.checked_add(b).ok_or_else(|| ToolError::Rpc {
                        code: -32602,
                        message: "'a' + 'b' overflows a 64-bit integer".to_string(),
                    })?;
                    Ok(ToolOutput::success(sum.to_string()))
                }),
            )
            .await;
        server
            .register_tool(
                ToolDescriptor::new(
                    "get_current_temperature_by_city",
                    "Get current temperature of a city",
                )
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"city_name": {"type": "string"}},
                    "required": ["city_name"]
                })),
                Arc::new(|_args| Ok(ToolOutput::success("20 degrees celcius"))),
            )
            .await;
        server
    }

    async fn insert_descriptor(&self, descriptor: ToolDescriptor) {
        let mut tools = self.tools.write().await;
        match tools.iter_mut().find(|t| t.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => tools.push(descriptor),
        }
    }

    /// Register a synchronous tool function.
    ///
    /// Subsequent calls will overwrite any existing tool with the same name.
    pub async fn register_tool(&self, descriptor: ToolDescriptor, function: ToolFunction) {
        let name = descriptor.name.clone();
        self.insert_descriptor(descriptor).await;
        self.async_functions.write().await.remove(&name);
        self.sync_functions.write().await.insert(name, function);
    }

    /// Register an asynchronous tool function.
    pub async fn register_async_tool(&self, descriptor: ToolDescriptor, function: AsyncToolFunction) {
        let name = descriptor.name.clone();
        self.insert_descriptor(descriptor).await;
        self.sync_functions.write().await.remove(&name);
        self.async_functions.write().await.insert(name, function);
    }

    /// Remove a tool from the server.
    pub async fn unregister_tool(&self, name: &str) {
        self.tools.write().await.retain(|t| t.name != name);
        self.sync_functions.write().await.remove(name);
        self.async_functions.write().await.remove(name);
    }

    async fn execute(&self, tool_name: &str, arguments: JsonValue) -> Result<ToolOutput, ToolError> {
        // Try async functions first
        let async_func = self.async_functions.read().await.get(tool_name).cloned();
        if let Some(func) = async_func {
            return func(arguments).await;
        }

        let sync_func = self.sync_functions.read().await.get(tool_name).cloned();
        if let Some(func) = sync_func {
            return func(arguments);
        }

        Err(ToolError::NotFound(tool_name.to_string()))
    }
}

impl Default for LocalToolServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Session onto a [`LocalToolServer`].
///
/// Several sessions may share one server; closing a session does not affect the others.
pub struct LocalSession {
    server: Arc<LocalToolServer>,
    closed: AtomicBool,
}

impl LocalSession {
    pub fn new(server: Arc<LocalToolServer>) -> Self {
        Self {
            server,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ToolError> {
        if self.is_closed() {
            Err(ToolError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ToolSession for LocalSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.ensure_open()?;
        Ok(self.server.tools.read().await.clone())
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<ToolOutput, ToolError> {
        self.ensure_open()?;
        self.server.execute(tool_name, arguments).await
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn protocol_name(&self) -> &str {
        "local"
    }
}

/// Connector resolving server names to in-process servers.
///
/// The endpoint URL is ignored; only the registry name matters.
#[derive(Default)]
pub struct LocalConnector {
    servers: HashMap<String, Arc<LocalToolServer>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `server` reachable under `name`.
    pub fn with_server(mut self, name: impl Into<String>, server: Arc<LocalToolServer>) -> Self {
        self.servers.insert(name.into(), server);
        self
    }
}

#[async_trait]
impl ToolServerConnector for LocalConnector {
    async fn connect(
        &self,
        server_name: &str,
        _endpoint: &ServerEndpoint,
    ) -> Result<Arc<dyn ToolSession>, ToolError> {
        let server = self.servers.get(server_name).ok_or_else(|| {
            ToolError::Transport(format!("no local server named '{}'", server_name))
        })?;
        Ok(Arc::new(LocalSession::new(Arc::clone(server))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_tools_are_listed_in_registration_order() {
        let server = Arc::new(LocalToolServer::with_demo_tools().await);
        let session = LocalSession::new(server);

        let names: Vec<String> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["add", "get_current_temperature_by_city"]);
    }

    #[tokio::test]
    async fn test_add_tool_executes() {
        let server = Arc::new(LocalToolServer::with_demo_tools().await);
        let session = LocalSession::new(server);

        let output = session
            .call_tool("add", json!({"a": 2, "b": 40}))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::success("42"));

        let err = session
            .call_tool("add", json!({"a": "two"}))
            .await
            .unwrap_err();
        assert!(err.is_reported_by_server());
    }

    #[tokio::test]
    async fn test_add_tool_reports_overflow() {
        let server = Arc::new(LocalToolServer::with_demo_tools().await);
        let session = LocalSession::new(server);

        match session
            .call_tool("add", json!({"a": i64::MAX, "b": 1}))
            .await
        {
            Err(ToolError::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert!(message.contains("overflows"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let output = session
            .call_tool("add", json!({"a": i64::MIN, "b": i64::MAX}))
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::success("-1"));
    }

    #[tokio::test]
    async fn test_async_registration_replaces_sync_tool_in_place() {
        let server = LocalToolServer::new();
        server
            .register_tool(
                ToolDescriptor::new("first", "first"),
                Arc::new(|_| Ok(ToolOutput::success("sync"))),
            )
            .await;
        server
            .register_tool(
                ToolDescriptor::new("second", "second"),
                Arc::new(|_| Ok(ToolOutput::success("other"))),
            )
            .await;
        server
            .register_async_tool(
                ToolDescriptor::new("first", "first, async"),
                Arc::new(|_| Box::pin(async { Ok::<_, ToolError>(ToolOutput::success("async")) })),
            )
            .await;

        let session = LocalSession::new(Arc::new(server));
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools[0].description, "first, async");
        assert_eq!(tools.len(), 2);
        assert_eq!(
            session.call_tool("first", json!({})).await.unwrap().text,
            "async"
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_and_closed_session() {
        let session = LocalSession::new(Arc::new(LocalToolServer::new()));
        assert!(matches!(
            session.call_tool("nope", json!({})).await,
            Err(ToolError::NotFound(_))
        ));

        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(matches!(session.list_tools().await, Err(ToolError::Closed)));
    }

    #[tokio::test]
    async fn test_connector_rejects_unknown_server() {
        let connector = LocalConnector::new()
            .with_server("known", Arc::new(LocalToolServer::new()));

        assert!(connector
            .connect("known", &ServerEndpoint::new("local"))
            .await
            .is_ok());
        assert!(matches!(
            connector.connect("other", &ServerEndpoint::new("local")).await,
            Err(ToolError::Transport(_))
        ));
    }
}
