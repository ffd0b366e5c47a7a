//! Tests for the OpenAI compatible client against an in-process axum server.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use toolconductor::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role};
use toolconductor::clients::openai::OpenAIClient;
use toolconductor::config::{ServerEndpoint, ServerRegistry};
use toolconductor::connection_manager::ConnectionManager;
use toolconductor::orchestration::OrchestrationLoop;
use toolconductor::tool_protocols::{LocalConnector, LocalToolServer};

#[derive(Clone, Default)]
struct MockChatApi {
    bodies: Arc<Mutex<Vec<JsonValue>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

/// Asks for `add` until a tool message is present, then answers with the observation.
async fn chat_completions(
    State(api): State<MockChatApi>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    api.auth.lock().unwrap().push(auth.clone());
    api.bodies.lock().unwrap().push(body.clone());

    if auth != "Bearer test-key" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "bad key"}})),
        )
            .into_response();
    }

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let observation = messages
        .iter()
        .rev()
        .find(|m| m["role"] == "tool")
        .map(|m| m["content"].as_str().unwrap_or_default().to_string());

    let reply = match observation {
        Some(observation) => json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": format!("The sum is {}.", observation)},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 6, "total_tokens": 46}
        }),
        None => json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\": 19, \"b\": 23}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 30, "completion_tokens": 12, "total_tokens": 42}
        }),
    };
    Json(reply).into_response()
}

async fn spawn_mock_api() -> (String, MockChatApi) {
    let api = MockChatApi::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(api.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1", addr), api)
}

fn add_tool() -> toolconductor::client_wrapper::ToolDefinition {
    toolconductor::tool_protocol::ToolDescriptor::new("add", "Add two numbers").to_tool_definition()
}

#[tokio::test]
async fn test_tool_call_response_is_mapped() {
    let (base_url, api) = spawn_mock_api().await;
    let client = OpenAIClient::new_with_base_url("test-key", "mock-model", &base_url);

    let reply = client
        .send_message(
            &[
                Message::new(Role::System, "Use tools."),
                Message::new(Role::User, "What is 19 + 23?"),
            ],
            Some(vec![add_tool()]),
        )
        .await
        .unwrap();

    assert!(reply.requests_tools());
    assert_eq!(
        reply.tool_calls,
        vec![NativeToolCall {
            id: "call_abc".into(),
            name: "add".into(),
            arguments: "{\"a\": 19, \"b\": 23}".into(),
        }]
    );
    assert_eq!(client.get_last_usage().await.unwrap().total_tokens, 42);

    let body = api.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "mock-model");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "add");
}

#[tokio::test]
async fn test_tool_history_is_serialized() {
    let (base_url, api) = spawn_mock_api().await;
    let client = OpenAIClient::new_with_base_url("test-key", "mock-model", &base_url);

    let history = vec![
        Message::new(Role::User, "What is 19 + 23?"),
        Message::assistant_with_tool_calls(
            "",
            vec![NativeToolCall {
                id: "call_abc".into(),
                name: "add".into(),
                arguments: "{}".into(),
            }],
        ),
        Message::tool_result("call_abc", "42"),
    ];
    let reply = client.send_message(&history, None).await.unwrap();

    assert!(!reply.requests_tools());
    assert_eq!(&*reply.content, "The sum is 42.");
    assert_eq!(client.get_last_usage().await.unwrap().input_tokens, 40);

    let body = api.bodies.lock().unwrap()[0].clone();
    assert!(body.get("tools").is_none());
    assert_eq!(body["messages"][1]["tool_calls"][0]["id"], "call_abc");
    assert_eq!(body["messages"][2]["role"], "tool");
    assert_eq!(body["messages"][2]["tool_call_id"], "call_abc");
    assert_eq!(api.auth.lock().unwrap()[0], "Bearer test-key");
}

#[tokio::test]
async fn test_error_status_is_an_error() {
    let (base_url, _api) = spawn_mock_api().await;
    let client = OpenAIClient::new_with_base_url("wrong-key", "mock-model", &base_url);

    let err = client
        .send_message(&[Message::new(Role::User, "hi")], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
    assert!(client.get_last_usage().await.is_none());
}

#[tokio::test]
async fn test_end_to_end_with_local_tools() {
    let (base_url, api) = spawn_mock_api().await;
    let registry = ServerRegistry::builder()
        .server("math", ServerEndpoint::new("in-process"))
        .build()
        .unwrap();
    let connector = LocalConnector::new()
        .with_server("math", Arc::new(LocalToolServer::with_demo_tools().await));
    let manager = ConnectionManager::start(registry, Arc::new(connector), None)
        .await
        .unwrap();
    let client = Arc::new(OpenAIClient::new_with_base_url(
        "test-key",
        "mock-model",
        &base_url,
    ));

    let answer = Arc::clone(&manager)
        .scope(|manager| async move {
            OrchestrationLoop::new(client, manager)
                .resolve("What is 19 + 23?")
                .await
        })
        .await
        .unwrap();

    assert_eq!(answer, "The sum is 42.");
    assert_eq!(api.bodies.lock().unwrap().len(), 2);
}
