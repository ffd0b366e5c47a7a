//! Tests for the MCP client against in-process axum servers speaking streamable HTTP and
//! legacy SSE.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use toolconductor::config::{McpTransport, ServerEndpoint, ServerRegistry};
use toolconductor::connection_manager::ConnectionManager;
use toolconductor::mcp_client::{McpHttpConnector, McpHttpSession};
use toolconductor::tool_protocol::{ToolError, ToolSession};

fn rpc_result(id: &JsonValue, result: JsonValue) -> JsonValue {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// The reply both mock servers give to a JSON-RPC request; `None` for notifications.
fn answer(body: &JsonValue) -> Option<JsonValue> {
    let id = body.get("id")?;
    let reply = match body["method"].as_str().unwrap_or_default() {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock", "version": "0.0.1"},
                "instructions": "Use search first."
            }),
        ),
        "tools/list" if body["params"]["cursor"] == "page-2" => rpc_result(
            id,
            json!({"tools": [{
                "name": "fetch",
                "description": "Fetch a document",
                "inputSchema": {"type": "object", "properties": {}}
            }]}),
        ),
        "tools/list" => rpc_result(
            id,
            json!({
                "tools": [{
                    "name": "search",
                    "description": "Search documents",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"query": {"type": "string"}},
                        "required": ["query"]
                    }
                }],
                "nextCursor": "page-2"
            }),
        ),
        "tools/call" => match body["params"]["name"].as_str() {
            Some("search") => rpc_result(
                id,
                json!({"content": [
                    {"type": "text", "text": format!("hits for {}", body["params"]["arguments"]["query"])},
                    {"type": "text", "text": "end of results"}
                ]}),
            ),
            Some("fails") => rpc_result(
                id,
                json!({"content": [{"type": "text", "text": "index offline"}], "isError": true}),
            ),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": "Unknown tool"}
            }),
        },
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        }),
    };
    Some(reply)
}

#[derive(Clone, Default)]
struct MockMcpServer {
    /// `<method>|<session header>` for every request received.
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockMcpServer {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn session_of(headers: &HeaderMap) -> String {
    headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

async fn handle_post(
    State(server): State<MockMcpServer>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    server
        .requests
        .lock()
        .unwrap()
        .push(format!("{}|{}", method, session_of(&headers)));

    let reply = match answer(&body) {
        Some(reply) => reply,
        None => return StatusCode::ACCEPTED.into_response(),
    };
    match method.as_str() {
        "initialize" => ([("mcp-session-id", "sess-1")], Json(reply)).into_response(),
        "tools/list" if body["params"]["cursor"] == "page-2" => {
            // Second page arrives as an event stream preceded by a log notification.
            let stream = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": "reading page 2"}
                }),
                reply
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], stream).into_response()
        }
        _ => Json(reply).into_response(),
    }
}

async fn handle_delete(State(server): State<MockMcpServer>, headers: HeaderMap) -> StatusCode {
    server
        .requests
        .lock()
        .unwrap()
        .push(format!("DELETE|{}", session_of(&headers)));
    StatusCode::OK
}

async fn spawn_mock_server() -> (String, MockMcpServer) {
    let server = MockMcpServer::default();
    let app = Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete))
        .with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/mcp", addr), server)
}

/// Legacy SSE server: `GET /sse` announces `/messages`, replies travel back over the stream.
#[derive(Clone, Default)]
struct LegacySseServer {
    /// `GET /sse` or `<method>|<session_id query>` for every request received.
    requests: Arc<Mutex<Vec<String>>>,
    stream: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

impl LegacySseServer {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn open_event_stream(
    State(server): State<LegacySseServer>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sender, receiver) = mpsc::unbounded_channel();
    *server.stream.lock().unwrap() = Some(sender);
    server.requests.lock().unwrap().push("GET /sse".to_string());

    let endpoint = stream::once(async {
        Ok::<Event, Infallible>(
            Event::default()
                .event("endpoint")
                .data("/messages?session_id=legacy-1"),
        )
    });
    let replies = stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|event| (Ok::<Event, Infallible>(event), receiver))
    });
    Sse::new(endpoint.chain(replies))
}

async fn handle_message(
    State(server): State<LegacySseServer>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<JsonValue>,
) -> StatusCode {
    let session = query.get("session_id").cloned().unwrap_or_default();
    server.requests.lock().unwrap().push(format!(
        "{}|{}",
        body["method"].as_str().unwrap_or_default(),
        session
    ));

    if let Some(reply) = answer(&body) {
        let sender = server.stream.lock().unwrap().clone();
        match sender {
            Some(sender) => {
                let _ = sender.send(Event::default().event("message").data(reply.to_string()));
            }
            None => return StatusCode::NOT_FOUND,
        }
    }
    StatusCode::ACCEPTED
}

async fn spawn_legacy_sse_server() -> (String, LegacySseServer) {
    let server = LegacySseServer::default();
    let app = Router::new()
        .route("/sse", get(open_event_stream))
        .route("/messages", post(handle_message))
        .with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/sse", addr), server)
}

#[tokio::test]
async fn test_handshake_captures_session_and_instructions() {
    let (url, server) = spawn_mock_server().await;
    let session = McpHttpSession::open(&ServerEndpoint::new(url.clone()))
        .await
        .unwrap();

    assert_eq!(session.endpoint(), url);
    assert_eq!(session.transport(), McpTransport::StreamableHttp);
    assert_eq!(session.protocol_name(), "mcp-http");
    assert_eq!(session.instructions(), Some("Use search first."));

    session.list_tools().await.unwrap();
    let requests = server.requests();
    assert_eq!(requests[0], "initialize|-");
    assert!(requests.contains(&"notifications/initialized|sess-1".to_string()));
    assert!(requests.contains(&"tools/list|sess-1".to_string()));
}

#[tokio::test]
async fn test_list_tools_follows_cursor_across_json_and_event_stream() {
    let (url, server) = spawn_mock_server().await;
    let session = McpHttpSession::open(&ServerEndpoint::new(url)).await.unwrap();

    let tools = session.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch"]);
    assert_eq!(tools[0].input_schema["required"][0], "query");
    assert_eq!(tools[1].input_schema["type"], "object");
    assert_eq!(tools[1].description, "Fetch a document");

    let lists = server
        .requests()
        .into_iter()
        .filter(|r| r.starts_with("tools/list"))
        .count();
    assert_eq!(lists, 2);
}

#[tokio::test]
async fn test_call_tool_results() {
    let (url, _server) = spawn_mock_server().await;
    let session = McpHttpSession::open(&ServerEndpoint::new(url)).await.unwrap();

    let output = session
        .call_tool("search", json!({"query": "travel policy"}))
        .await
        .unwrap();
    assert!(!output.is_error);
    assert_eq!(output.text, "hits for \"travel policy\"\nend of results");

    let output = session.call_tool("fails", JsonValue::Null).await.unwrap();
    assert!(output.is_error);
    assert_eq!(output.text, "index offline");

    match session.call_tool("missing", json!({})).await {
        Err(ToolError::Rpc { code, message }) => {
            assert_eq!(code, -32602);
            assert_eq!(message, "Unknown tool");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let err = session.call_tool("search", json!([1, 2])).await.unwrap_err();
    assert!(err.is_reported_by_server());
}

#[tokio::test]
async fn test_close_is_idempotent_and_ends_the_session() {
    let (url, server) = spawn_mock_server().await;
    let session = McpHttpSession::open(&ServerEndpoint::new(url)).await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert!(matches!(
        session.call_tool("search", json!({})).await,
        Err(ToolError::Closed)
    ));
    assert!(matches!(session.list_tools().await, Err(ToolError::Closed)));
    let deletes = server
        .requests()
        .into_iter()
        .filter(|r| r.starts_with("DELETE"))
        .count();
    assert!(deletes <= 1);
}

#[tokio::test]
async fn test_connection_manager_over_http() {
    let (url, _server) = spawn_mock_server().await;
    let registry = ServerRegistry::builder()
        .server("docs", ServerEndpoint::new(url).with_timeout(5))
        .build()
        .unwrap();

    let manager = ConnectionManager::start(registry, Arc::new(McpHttpConnector::new()), None)
        .await
        .unwrap();
    assert_eq!(manager.server_for("fetch").await.as_deref(), Some("docs"));

    let outcome = manager
        .call_tool("search", json!({"query": "q"}))
        .await
        .unwrap();
    assert_eq!(outcome.into_content(), "hits for \"q\"\nend of results");

    // JSON-RPC errors are the server's answer, not a broken connection.
    let outcome = manager.call_tool("fetch", json!({})).await.unwrap();
    assert!(outcome.into_content().contains("Unknown tool"));

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_http_failure_during_handshake_is_transport_error() {
    let app = Router::new().route("/mcp", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let endpoint = ServerEndpoint::new(format!("http://{}/mcp", addr)).with_timeout(5);
    let result = McpHttpSession::open(&endpoint).await;
    assert!(matches!(result, Err(ToolError::Transport(_))));
}

#[tokio::test]
async fn test_legacy_sse_handshake_list_and_call() {
    let (url, server) = spawn_legacy_sse_server().await;
    let session = McpHttpSession::open(&ServerEndpoint::new(url).with_timeout(5))
        .await
        .unwrap();

    assert_eq!(session.transport(), McpTransport::Sse);
    assert_eq!(session.protocol_name(), "mcp-sse");
    assert_eq!(session.instructions(), Some("Use search first."));

    let tools = session.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch"]);

    let output = session
        .call_tool("search", json!({"query": "leave policy"}))
        .await
        .unwrap();
    assert_eq!(output.text, "hits for \"leave policy\"\nend of results");

    match session.call_tool("missing", json!({})).await {
        Err(ToolError::Rpc { code, .. }) => assert_eq!(code, -32602),
        other => panic!("unexpected result: {:?}", other),
    }

    let requests = server.requests();
    assert_eq!(requests[0], "GET /sse");
    assert_eq!(requests[1], "initialize|legacy-1");
    assert!(requests.contains(&"notifications/initialized|legacy-1".to_string()));
    assert!(requests.contains(&"tools/call|legacy-1".to_string()));

    session.close().await.unwrap();
    assert!(matches!(
        session.call_tool("search", json!({})).await,
        Err(ToolError::Closed)
    ));
}

#[tokio::test]
async fn test_connection_manager_over_legacy_sse() {
    let (url, _server) = spawn_legacy_sse_server().await;
    let registry: ServerRegistry =
        serde_json::from_value(json!({ "MCP_SERVER": url })).unwrap();

    let manager = ConnectionManager::start(registry, Arc::new(McpHttpConnector::new()), None)
        .await
        .unwrap();
    assert_eq!(
        manager.server_for("search").await.as_deref(),
        Some("MCP_SERVER")
    );

    let outcome = manager
        .call_tool("search", json!({"query": "q"}))
        .await
        .unwrap();
    assert_eq!(outcome.into_content(), "hits for \"q\"\nend of results");

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_pinned_sse_transport_against_streamable_server_fails() {
    let (url, _server) = spawn_mock_server().await;
    let endpoint = ServerEndpoint::new(url)
        .with_timeout(5)
        .with_transport(McpTransport::Sse);

    assert!(matches!(
        McpHttpSession::open(&endpoint).await,
        Err(ToolError::Transport(_))
    ));
}
