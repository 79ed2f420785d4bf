//! In-process backend for the HTTP tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde_json::{Value, json};

/// One streaming request as the server saw it.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub conversation_id: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

/// One REST call as the server saw it.
#[derive(Clone, Debug)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct MockState {
    pub requests: Arc<Mutex<Vec<Recorded>>>,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub answered: Arc<AtomicBool>,
    pub titles: Arc<Mutex<Vec<String>>>,
}

pub struct MockServer {
    pub base_url: String,
    pub state: MockState,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/auth/login", post(login))
            .route(
                "/chat/conversations",
                get(list_conversations).post(create_conversation),
            )
            .route("/chat/conversations/with-message", post(create_with_message))
            .route(
                "/chat/conversations/{id}",
                get(get_conversation)
                    .patch(update_conversation)
                    .delete(delete_conversation),
            )
            .route("/chat/conversations/{id}/system-prompt", patch(update_system_prompt))
            .route("/chat/conversations/{id}/messages", post(stream_reply))
            .route("/chat/conversations/{id}/generate-title", post(generate_title))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }
}

impl MockState {
    fn record(&self, method: &'static str, path: String, body: Value) {
        self.calls.lock().unwrap().push(Call { method, path, body });
    }
}

fn conversation_json(id: &str, title: &Value, system_prompt: &Value) -> Value {
    json!({
        "id": id,
        "title": title.as_str().unwrap_or("New Chat"),
        "systemPrompt": system_prompt,
        "createdAt": "2025-01-01T00:00:00Z",
        "updatedAt": "2025-01-02T00:00:00Z"
    })
}

/// Body bytes written one piece at a time, with a pause in between so
/// the client sees them as separate reads.
fn chunked(pieces: Vec<&'static str>) -> Response {
    let body = stream::iter(pieces).then(|piece| async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        Ok::<Bytes, Infallible>(Bytes::from_static(piece.as_bytes()))
    });
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn stream_reply(
    State(state): State<MockState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(Recorded {
        conversation_id: id.clone(),
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body,
    });

    match id.as_str() {
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "model exploded" })),
        )
            .into_response(),
        "empty" => StatusCode::NO_CONTENT.into_response(),
        "locked" => StatusCode::UNAUTHORIZED.into_response(),
        "plain" => chunked(vec![
            "data: {\"delta\":\"hel\"}\n",
            "data: {\"delta\":\"lo\",\"isComplete\":true}\n",
        ]),
        _ => {
            state.answered.store(true, Ordering::SeqCst);
            chunked(vec![
                "data: {\"type\":\"start\"}\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"he",
                "l\"}\n",
                "data: {not json\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\r\n",
                "data: {\"type\":\"finish\"}\n",
                "data: [DONE]\n",
            ])
        }
    }
}

async fn get_conversation(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    if id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Conversation not found" })))
            .into_response();
    }

    let messages = if state.answered.load(Ordering::SeqCst) {
        json!([
            { "id": "m1", "role": "user", "content": "hello", "createdAt": "2025-01-01T00:00:00Z" },
            { "id": "m2", "role": "assistant", "content": "hello", "createdAt": "2025-01-01T00:00:01Z" }
        ])
    } else {
        json!([])
    };

    Json(json!({
        "id": id,
        "title": "New Chat",
        "createdAt": "2025-01-01T00:00:00Z",
        "updatedAt": "2025-01-01T00:00:00Z",
        "messages": messages,
    }))
    .into_response()
}

async fn list_conversations(headers: HeaderMap) -> Response {
    if !headers.contains_key(header::AUTHORIZATION) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if headers
        .get(header::AUTHORIZATION)
        .is_some_and(|v| v.as_bytes() == b"Bearer expired")
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(json!([{
        "id": "c1",
        "title": "First",
        "createdAt": "2025-01-01T00:00:00Z",
        "updatedAt": "2025-01-01T00:00:00Z"
    }]))
    .into_response()
}

async fn generate_title(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let message = body["message"].as_str().unwrap_or_default().to_string();
    state.titles.lock().unwrap().push(format!("{id}:{message}"));
    Json(json!({ "title": "Greeting" }))
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] != "secret123" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response();
    }

    Json(json!({
        "accessToken": "tok-123",
        "user": { "id": "u1", "email": body["email"], "credits": 10 }
    }))
    .into_response()
}

async fn create_conversation(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    let created = conversation_json("c-empty", &body["title"], &Value::Null);
    state.record("POST", "/chat/conversations".into(), body);
    Json(created)
}

async fn create_with_message(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    let created = conversation_json("c2", &body["title"], &body["systemPrompt"]);
    state.record("POST", "/chat/conversations/with-message".into(), body);
    Json(created)
}

async fn update_conversation(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let updated = conversation_json(&id, &body["title"], &body["systemPrompt"]);
    state.record("PATCH", format!("/chat/conversations/{id}"), body);
    Json(updated)
}

async fn update_system_prompt(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let updated = conversation_json(&id, &json!("First"), &body["systemPrompt"]);
    state.record("PATCH", format!("/chat/conversations/{id}/system-prompt"), body);
    Json(updated)
}

async fn delete_conversation(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    state.record("DELETE", format!("/chat/conversations/{id}"), Value::Null);
    if id == "missing" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Conversation not found" })))
            .into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}
