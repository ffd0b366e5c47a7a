//! One logical connection to a single tool server.
//!
//! A [`ToolServerConnection`] owns the [`ToolSession`] opened for one registry entry and
//! applies the per-server rules the manager relies on: calls to sessions that cannot carry
//! concurrent requests are serialized, and closing happens at most once.

use crate::config::ServerEndpoint;
use crate::tool_protocol::{ToolDescriptor, ToolError, ToolOutput, ToolServerConnector, ToolSession};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ToolServerConnection {
    server_name: String,
    session: Arc<dyn ToolSession>,
    /// Present when the session must see one request at a time.
    serial_gate: Option<Mutex<()>>,
    closed: AtomicBool,
}

impl ToolServerConnection {
    /// Open a session to `server_name` through `connector`.
    pub async fn open(
        server_name: &str,
        endpoint: &ServerEndpoint,
        connector: &dyn ToolServerConnector,
    ) -> Result<Self, ToolError> {
        let session = connector.connect(server_name, endpoint).await?;
        Ok(Self::from_session(server_name, session))
    }

    /// Wrap an already open session.
    pub fn from_session(server_name: impl Into<String>, session: Arc<dyn ToolSession>) -> Self {
        let serial_gate = if session.supports_concurrent_requests() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self {
            server_name: server_name.into(),
            session,
            serial_gate,
            closed: AtomicBool::new(false),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn protocol(&self) -> &str {
        self.session.protocol_name()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let _turn = match &self.serial_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.session.list_tools().await
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: JsonValue,
    ) -> Result<ToolOutput, ToolError> {
        let _turn = match &self.serial_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        self.session.call_tool(tool_name, arguments).await
    }

    /// Release the session. Only the first call reaches the session.
    pub async fn close(&self) -> Result<(), ToolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session.close().await
    }
}
