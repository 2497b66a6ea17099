//! Integration tests for the HTTP API and WebSocket event stream.
//!
//! Each test binds a real server on a free port, drives sessions over HTTP
//! and watches the events arrive on `/ws`.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use lesson_engine::memory::MemoryProgressStore;
use lesson_engine::{create_router, AppState, EngineConfig, EngineEvent};
use lesson_store::FileContentProvider;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    base_url: String,
    ws_url: String,
    http: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Spawns a server over the fixture lessons and an in-memory store.
    async fn spawn() -> Self {
        let lessons = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/lessons");
        let state = AppState::new(
            EngineConfig::default(),
            Arc::new(FileContentProvider::new(lessons)),
            Arc::new(MemoryProgressStore::new()),
        );

        let port = find_available_port();
        let addr = format!("127.0.0.1:{port}");
        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{addr}/api"),
            ws_url: format!("ws://{addr}/ws"),
            http: reqwest::Client::new(),
            _handle: handle,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Request failed");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn create_session(&self, lesson_id: &str) -> String {
        let (status, body) = self
            .post("/sessions", json!({"userId": "ada", "lessonId": lesson_id}))
            .await;
        assert_eq!(status, 201, "Unexpected create response: {body}");
        body["sessionId"]
            .as_str()
            .expect("Missing sessionId")
            .to_string()
    }

    async fn connect(&self) -> WsClient {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .expect("Failed to connect to WebSocket");
        ws_stream
    }
}

/// Receives the next text message from the WebSocket and parses it as an
/// engine event. Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> EngineEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects event names until `last` arrives.
async fn events_until(client: &mut WsClient, last: &str) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = receive_event(client).await;
        let done = event.event_name() == last;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let event = receive_event(&mut client).await;
    assert_eq!(event, EngineEvent::Connected { active_sessions: 0 });
}

#[tokio::test]
async fn test_connected_event_counts_open_sessions() {
    let server = TestServer::spawn().await;
    server.create_session("basics").await;
    server.create_session("tour").await;

    let mut client = server.connect().await;
    let event = receive_event(&mut client).await;
    assert_eq!(event, EngineEvent::Connected { active_sessions: 2 });
}

// ============================================================================
// Session Flow Tests
// ============================================================================

#[tokio::test]
async fn test_full_lesson_streams_events_in_order() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    receive_event(&mut client).await;

    let id = server.create_session("basics").await;
    for _ in 0..5 {
        let (status, body) = server
            .post(
                &format!("/sessions/{id}/answer"),
                json!({"response": {"kind": "choice", "value": 1}}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["outcome"], "judged");
        assert_eq!(body["correctness"], "correct");

        let (status, _) = server
            .post(&format!("/sessions/{id}/advance"), json!({}))
            .await;
        assert_eq!(status, 200);
    }

    let events = events_until(&mut client, "completion_ready").await;
    let names: Vec<_> = events.iter().map(EngineEvent::event_name).collect();
    assert_eq!(names.first(), Some(&"session_started"));
    assert_eq!(names.iter().filter(|n| **n == "step_judged").count(), 5);
    assert_eq!(names.iter().filter(|n| **n == "step_advanced").count(), 4);

    let celebrating = names
        .iter()
        .position(|n| *n == "celebrating")
        .expect("No celebrating event");
    assert!(celebrating < names.len() - 1);

    match events.last() {
        Some(EngineEvent::CompletionReady { result, lesson_id, .. }) => {
            assert_eq!(lesson_id, "basics");
            assert!(result.is_perfect);
            assert_eq!(result.base_xp, 20);
        }
        other => panic!("Expected completion_ready, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_game_over_and_retry_over_http() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    receive_event(&mut client).await;

    let id = server.create_session("basics").await;
    for _ in 0..3 {
        server
            .post(
                &format!("/sessions/{id}/answer"),
                json!({"response": {"kind": "choice", "value": 0}}),
            )
            .await;
        server
            .post(&format!("/sessions/{id}/advance"), json!({}))
            .await;
    }

    let events = events_until(&mut client, "game_over").await;
    assert!(matches!(
        events.last(),
        Some(EngineEvent::GameOver {
            step_index: 2,
            score: 0,
            ..
        })
    ));

    let (status, body) = server
        .post(&format!("/sessions/{id}/retry"), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["attempt"], 2);
    assert_eq!(body["snapshot"]["lives"], 3);
    assert_eq!(body["snapshot"]["currentStepIndex"], 0);

    let events = events_until(&mut client, "session_retried").await;
    assert!(matches!(
        events.last(),
        Some(EngineEvent::SessionRetried { attempt: 2, .. })
    ));
}

#[tokio::test]
async fn test_unknown_lesson_is_not_found() {
    let server = TestServer::spawn().await;
    let (status, body) = server
        .post("/sessions", json!({"userId": "ada", "lessonId": "missing"}))
        .await;
    assert_eq!(status, 404);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("missing")));
}

#[tokio::test]
async fn test_exit_removes_session_and_notifies_clients() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    receive_event(&mut client).await;

    let id = server.create_session("tour").await;
    let response = server
        .http
        .delete(format!("{}/sessions/{id}", server.base_url))
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());

    let events = events_until(&mut client, "session_exited").await;
    assert_eq!(events.first().map(EngineEvent::event_name), Some("session_started"));

    let response = server
        .http
        .get(format!("{}/sessions/{id}", server.base_url))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_multiple_clients_see_the_same_events() {
    let server = TestServer::spawn().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;

    let id = server.create_session("basics").await;

    for client in [&mut first, &mut second] {
        match receive_event(client).await {
            EngineEvent::SessionStarted {
                session_id,
                total_steps,
                ..
            } => {
                assert_eq!(session_id.to_string(), id);
                assert_eq!(total_steps, 5);
            }
            other => panic!("Expected session_started, got: {other:?}"),
        }
    }
}
