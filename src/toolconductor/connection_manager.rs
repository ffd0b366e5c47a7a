//! Connection Manager
//!
//! The [`ConnectionManager`] owns one [`ToolServerConnection`] per entry of the
//! [`ServerRegistry`], merges the servers' catalogs into a single namespace and routes each
//! tool call to the server that owns the tool.
//!
//! # Lifecycle
//!
//! ```text
//! Unopened ──initialize()──► Initialized ──close()──► Closed
//!     │                                                  ▲
//!     └──────────initialize() fails (rolled back)────────┘
//! ```
//!
//! `list_tools()` and `call_tool()` are only valid while `Initialized`; calling them in any
//! other state is a programming error and panics. `close()` is valid in every state and is
//! idempotent.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use toolconductor::config::{ServerEndpoint, ServerRegistry};
//! use toolconductor::connection_manager::ConnectionManager;
//! use toolconductor::tool_protocols::{LocalConnector, LocalToolServer};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ServerRegistry::builder()
//!     .server("demo", ServerEndpoint::new("in-process"))
//!     .build()?;
//! let connector = LocalConnector::new()
//!     .with_server("demo", Arc::new(LocalToolServer::with_demo_tools().await));
//!
//! let manager = Arc::new(ConnectionManager::new(registry, Arc::new(connector)));
//! manager.initialize().await?;
//! manager.list_tools().await?;
//!
//! let outcome = manager.call_tool("add", json!({"a": 1, "b": 2})).await?;
//! assert_eq!(outcome.into_content(), "3");
//!
//! manager.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::client_wrapper::ToolDefinition;
use crate::config::ServerRegistry;
use crate::event::{ConnectionEvent, EventHandler};
use crate::tool_protocol::{ToolDescriptor, ToolError, ToolOutput, ToolServerConnector};
use crate::tool_server_connection::ToolServerConnection;
use futures_util::FutureExt;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lifecycle state of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unopened,
    Initialized,
    Closed,
}

/// Errors raised by the connection manager.
#[derive(Debug)]
pub enum ConnectionError {
    /// A server could not be reached during `initialize()`. Fatal for the manager.
    Connect { server: String, source: ToolError },
    /// A server failed to return its catalog.
    ListTools { server: String, source: ToolError },
    /// The channel to a server broke while a tool call was in flight.
    Transport {
        server: String,
        tool: String,
        source: ToolError,
    },
    /// One or more sessions failed to close. Every session was still attempted.
    Close { failures: Vec<(String, ToolError)> },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Connect { server, source } => {
                write!(f, "Failed to connect to server '{}': {}", server, source)
            }
            ConnectionError::ListTools { server, source } => {
                write!(f, "Failed to list tools of server '{}': {}", server, source)
            }
            ConnectionError::Transport {
                server,
                tool,
                source,
            } => write!(
                f,
                "Transport failure calling '{}' on server '{}': {}",
                tool, server, source
            ),
            ConnectionError::Close { failures } => {
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                write!(f, "Failed to close sessions: {}", names.join(", "))
            }
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectionError::Connect { source, .. }
            | ConnectionError::ListTools { source, .. }
            | ConnectionError::Transport { source, .. } => Some(source),
            ConnectionError::Close { failures } => failures
                .first()
                .map(|(_, source)| source as &(dyn Error + 'static)),
        }
    }
}

/// Result of routing a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// The owning server answered; a tool reported failure is carried in the output.
    Output(ToolOutput),
    /// No server advertises the tool.
    NotFound(String),
}

impl ToolCallOutcome {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolCallOutcome::NotFound(_))
    }

    /// Text handed back to the model as the tool message content.
    pub fn into_content(self) -> String {
        match self {
            ToolCallOutcome::Output(output) => output.text,
            ToolCallOutcome::NotFound(name) => format!("Tool '{}' not found.", name),
        }
    }
}

/// Tool name → owning server name.
#[derive(Debug, Clone, Default)]
pub struct ToolIndex {
    owners: HashMap<String, String>,
}

impl ToolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `server` as the owner of `tool`, returning the previous owner.
    ///
    /// Last write wins.
    pub fn insert(&mut self, tool: impl Into<String>, server: impl Into<String>) -> Option<String> {
        self.owners.insert(tool.into(), server.into())
    }

    pub fn server_for(&self, tool: &str) -> Option<&str> {
        self.owners.get(tool).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

struct ManagerInner {
    state: ManagerState,
    connections: Vec<Arc<ToolServerConnection>>,
    index: ToolIndex,
    tools: Vec<ToolDescriptor>,
}

impl ManagerInner {
    fn expect_initialized(&self, operation: &str) {
        assert!(
            self.state == ManagerState::Initialized,
            "ConnectionManager::{} called while {:?}; initialize() must succeed first",
            operation,
            self.state
        );
    }

    fn connection(&self, server_name: &str) -> Option<Arc<ToolServerConnection>> {
        self.connections
            .iter()
            .find(|c| c.server_name() == server_name)
            .cloned()
    }
}

/// Owns the sessions to every registered tool server and routes calls between them.
///
/// Share it across conversations as `Arc<ConnectionManager>`; every method takes `&self`.
pub struct ConnectionManager {
    registry: ServerRegistry,
    connector: Arc<dyn ToolServerConnector>,
    inner: RwLock<ManagerInner>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ConnectionManager {
    pub fn new(registry: ServerRegistry, connector: Arc<dyn ToolServerConnector>) -> Self {
        Self {
            registry,
            connector,
            inner: RwLock::new(ManagerInner {
                state: ManagerState::Unopened,
                connections: Vec::new(),
                index: ToolIndex::new(),
                tools: Vec::new(),
            }),
            event_handler: None,
        }
    }

    /// Attach an event handler receiving [`ConnectionEvent`]s.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build, initialize and index in one step.
    ///
    /// If listing fails after the sessions were opened, they are closed before the error is
    /// returned.
    pub async fn start(
        registry: ServerRegistry,
        connector: Arc<dyn ToolServerConnector>,
        event_handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<Arc<Self>, ConnectionError> {
        let mut manager = Self::new(registry, connector);
        manager.event_handler = event_handler;
        let manager = Arc::new(manager);

        manager.initialize().await?;
        if let Err(err) = manager.list_tools().await {
            if let Err(close_err) = manager.close().await {
                log::error!("cleanup after failed listing: {}", close_err);
            }
            return Err(err);
        }
        Ok(manager)
    }

    async fn emit(&self, events: Vec<ConnectionEvent>) {
        if let Some(handler) = &self.event_handler {
            for event in &events {
                handler.on_connection_event(event).await;
            }
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub async fn state(&self) -> ManagerState {
        self.inner.read().await.state
    }

    /// Open a session to every registered server, sequentially in registry order.
    ///
    /// Any failure is fatal: sessions opened so far are closed, the manager moves to
    /// `Closed` and the connect error is returned.
    ///
    /// # Panics
    ///
    /// If the manager is not `Unopened`.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.write().await;
        assert!(
            inner.state == ManagerState::Unopened,
            "ConnectionManager::initialize called while {:?}",
            inner.state
        );

        let mut events = Vec::new();
        let mut failure = None;
        for (name, endpoint) in self.registry.iter() {
            match ToolServerConnection::open(name, endpoint, self.connector.as_ref()).await {
                Ok(connection) => {
                    log::info!("connected to '{}' ({})", name, connection.protocol());
                    events.push(ConnectionEvent::ServerConnected {
                        server_name: name.to_string(),
                        protocol: connection.protocol().to_string(),
                    });
                    inner.connections.push(Arc::new(connection));
                }
                Err(source) => {
                    log::error!(
                        "failed to connect to '{}' at {}: {}",
                        name,
                        endpoint.url,
                        source
                    );
                    failure = Some(ConnectionError::Connect {
                        server: name.to_string(),
                        source,
                    });
                    break;
                }
            }
        }

        match failure {
            None => {
                inner.state = ManagerState::Initialized;
                drop(inner);
                self.emit(events).await;
                Ok(())
            }
            Some(err) => {
                inner.state = ManagerState::Closed;
                let opened = std::mem::take(&mut inner.connections);
                drop(inner);
                self.emit(events).await;
                let (_, close_events) = close_all(opened).await;
                self.emit(close_events).await;
                Err(err)
            }
        }
    }

    /// Query every server's catalog and rebuild the tool index.
    ///
    /// Returns the flat catalog: servers in registry order, tools in each server's order.
    /// When two servers advertise the same name the later server owns it. Duplicates are neither
    /// rejected nor namespaced per server; each shadowing is logged and reported as
    /// [`ConnectionEvent::ToolShadowed`].
    ///
    /// # Panics
    ///
    /// If the manager is not `Initialized`.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        let connections = {
            let inner = self.inner.read().await;
            inner.expect_initialized("list_tools");
            inner.connections.clone()
        };

        let mut index = ToolIndex::new();
        let mut tools = Vec::new();
        let mut events = Vec::new();
        for connection in &connections {
            let server = connection.server_name();
            let advertised = connection
                .list_tools()
                .await
                .map_err(|source| ConnectionError::ListTools {
                    server: server.to_string(),
                    source,
                })?;

            for tool in &advertised {
                if let Some(previous) = index.insert(tool.name.clone(), server) {
                    if previous != server {
                        log::warn!(
                            "tool '{}' from '{}' shadows the one from '{}'",
                            tool.name,
                            server,
                            previous
                        );
                        events.push(ConnectionEvent::ToolShadowed {
                            tool_name: tool.name.clone(),
                            previous_server: previous,
                            winner: server.to_string(),
                        });
                    }
                }
            }
            log::debug!("indexed {} tools from '{}'", advertised.len(), server);
            events.push(ConnectionEvent::ToolsIndexed {
                server_name: server.to_string(),
                tool_count: advertised.len(),
            });
            tools.extend(advertised);
        }

        {
            let mut inner = self.inner.write().await;
            inner.index = index;
            inner.tools = tools.clone();
        }
        self.emit(events).await;
        Ok(tools)
    }

    /// Catalog from the last `list_tools()`.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.inner.read().await.tools.clone()
    }

    /// Catalog from the last `list_tools()` rendered for the model.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.inner
            .read()
            .await
            .tools
            .iter()
            .map(ToolDescriptor::to_tool_definition)
            .collect()
    }

    /// Server owning `tool_name` according to the index.
    pub async fn server_for(&self, tool_name: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .index
            .server_for(tool_name)
            .map(str::to_string)
    }

    /// Route a tool call to its owning server.
    ///
    /// Unknown names and tool reported failures are outcomes. Only a broken channel to the
    /// server is an error.
    ///
    /// # Panics
    ///
    /// If the manager is not `Initialized`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<ToolCallOutcome, ConnectionError> {
        let connection = {
            let inner = self.inner.read().await;
            inner.expect_initialized("call_tool");
            inner
                .index
                .server_for(tool_name)
                .and_then(|server| inner.connection(server))
        };

        let connection = match connection {
            Some(connection) => connection,
            None => {
                log::warn!("tool '{}' not found", tool_name);
                return Ok(ToolCallOutcome::NotFound(tool_name.to_string()));
            }
        };

        match connection.call_tool(tool_name, arguments).await {
            Ok(output) => Ok(ToolCallOutcome::Output(output)),
            Err(err) if err.is_reported_by_server() => {
                Ok(ToolCallOutcome::Output(ToolOutput::failure(err.to_string())))
            }
            Err(source) => {
                log::error!(
                    "'{}' on '{}' failed: {}",
                    tool_name,
                    connection.server_name(),
                    source
                );
                Err(ConnectionError::Transport {
                    server: connection.server_name().to_string(),
                    tool: tool_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Release every open session.
    ///
    /// All sessions are attempted even if some fail; failures are aggregated. Calling this on
    /// an already closed manager is a no-op.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let connections = {
            let mut inner = self.inner.write().await;
            if inner.state == ManagerState::Closed {
                return Ok(());
            }
            inner.state = ManagerState::Closed;
            inner.index = ToolIndex::new();
            inner.tools.clear();
            std::mem::take(&mut inner.connections)
        };

        let (failures, events) = close_all(connections).await;
        self.emit(events).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConnectionError::Close { failures })
        }
    }

    /// Run `body` against this manager and close it afterwards, however `body` ends.
    ///
    /// On success a close failure is returned; when `body` already failed its error wins and
    /// the close failure is only logged. A panic in `body` is resumed after cleanup.
    pub async fn scope<F, Fut, T, E>(self: Arc<Self>, body: F) -> Result<T, E>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ConnectionError>,
    {
        let outcome = AssertUnwindSafe(body(Arc::clone(&self)))
            .catch_unwind()
            .await;
        let closed = self.close().await;

        match outcome {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Err(err)) => {
                if let Err(close_err) = closed {
                    log::error!("cleanup after failure: {}", close_err);
                }
                Err(err)
            }
            Ok(Ok(value)) => {
                closed?;
                Ok(value)
            }
        }
    }
}

async fn close_all(
    connections: Vec<Arc<ToolServerConnection>>,
) -> (Vec<(String, ToolError)>, Vec<ConnectionEvent>) {
    let mut failures = Vec::new();
    let mut events = Vec::with_capacity(connections.len());
    for connection in connections {
        let server_name = connection.server_name().to_string();
        match connection.close().await {
            Ok(()) => {
                log::info!("closed '{}'", server_name);
                events.push(ConnectionEvent::ServerClosed {
                    server_name,
                    error: None,
                });
            }
            Err(err) => {
                log::warn!("closing '{}' failed: {}", server_name, err);
                events.push(ConnectionEvent::ServerClosed {
                    server_name: server_name.clone(),
                    error: Some(err.to_string()),
                });
                failures.push((server_name, err));
            }
        }
    }
    (failures, events)
}
