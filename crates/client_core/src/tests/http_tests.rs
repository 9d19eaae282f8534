use super::*;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    session: Option<String>,
    user_id: Option<String>,
    body: Option<Value>,
}

#[derive(Clone, Default)]
struct ServerState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl ServerState {
    async fn record(
        &self,
        path: impl Into<String>,
        headers: &AxumHeaders,
        query: Option<&HashMap<String, String>>,
        body: Option<Value>,
    ) {
        self.requests.lock().await.push(Recorded {
            path: path.into(),
            session: headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            user_id: query.and_then(|q| q.get("user_id").cloned()),
            body,
        });
    }
}

async fn chat(
    State(state): State<ServerState>,
    headers: AxumHeaders,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let question = body["question"].as_str().unwrap_or_default().to_string();
    state.record("/chat", &headers, None, Some(body)).await;
    match question.as_str() {
        "2+2?" => (
            AxumStatus::OK,
            Json(json!({ "answer": "4", "suggestions": ["3+3?"], "ai_mode": "math" })),
        ),
        "slow down" => (
            AxumStatus::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "timeout" })),
        ),
        _ => (AxumStatus::BAD_GATEWAY, Json(json!({ "unexpected": true }))),
    }
}

async fn list_conversations(
    State(state): State<ServerState>,
    headers: AxumHeaders,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state
        .record("/conversations", &headers, Some(&query), None)
        .await;
    Json(json!({
        "conversations": [
            { "id": "a", "title": "First", "updated_at": "2024-01-01 10:00:00",
              "message_count": 2, "ai_mode": "math", "is_current": false },
            { "id": "b", "title": "Second", "updated_at": "2024-01-02T10:00:00",
              "message_count": 0, "is_current": true }
        ]
    }))
}

async fn switch_conversation(
    State(state): State<ServerState>,
    headers: AxumHeaders,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state
        .record(format!("/conversations/{id}/switch"), &headers, Some(&query), None)
        .await;
    Json(json!({ "conversation": { "id": id, "ai_mode": "physics" } }))
}

async fn delete_conversation(
    State(state): State<ServerState>,
    headers: AxumHeaders,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .record(format!("/conversations/{id}"), &headers, None, None)
        .await;
    (
        AxumStatus::NOT_FOUND,
        Json(json!({ "error": "conversation not found" })),
    )
}

async fn fetch_conversation(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "conversation": {
            "id": id,
            "messages": [
                { "question": "hi", "answer": "hello" },
                { "question": "2+2?", "answer": "4" }
            ],
            "ai_mode": "math"
        }
    }))
}

async fn calendar_process(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "success": false,
        "message": format!("need auth for '{}'", body["message"].as_str().unwrap_or_default()),
        "data": { "auth_url": "https://auth.example/start", "requires_auth": true },
        "action": "auth_required"
    }))
}

async fn calendar_auth_url() -> Json<Value> {
    Json(json!({ "success": false, "error": "oauth client not configured" }))
}

async fn spawn_chat_server() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/chat", post(chat))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/switch", post(switch_conversation))
        .route(
            "/conversations/:id",
            delete(delete_conversation).get(fetch_conversation),
        )
        .route("/calendar/process", post(calendar_process))
        .route("/calendar/auth/url", get(calendar_auth_url))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn backend(server_url: &str) -> HttpChatBackend {
    HttpChatBackend::new(
        server_url,
        UserId::new("user-7"),
        SessionId::new("session-abc"),
    )
    .expect("backend")
}

#[tokio::test]
async fn ask_posts_question_with_user_and_session() {
    let (server_url, state) = spawn_chat_server().await.expect("spawn server");
    let backend = backend(&server_url);

    let reply = backend.ask("2+2?").await.expect("answer");

    assert_eq!(reply.answer.as_deref(), Some("4"));
    assert_eq!(reply.suggestions, vec!["3+3?".to_string()]);
    assert_eq!(reply.ai_mode.as_ref().map(AiMode::as_str), Some("math"));

    let requests = state.requests.lock().await;
    let recorded = requests.first().expect("recorded request");
    assert_eq!(recorded.path, "/chat");
    assert_eq!(recorded.session.as_deref(), Some("session-abc"));
    let body = recorded.body.as_ref().expect("body");
    assert_eq!(body["question"], "2+2?");
    assert_eq!(body["user_id"], "user-7");
}

#[tokio::test]
async fn ask_surfaces_server_error_text() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let err = backend(&server_url)
        .ask("slow down")
        .await
        .expect_err("must fail");

    assert_eq!(err, RequestFailure::Server("timeout".to_string()));
}

#[tokio::test]
async fn ask_without_error_body_reports_status() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let err = backend(&server_url)
        .ask("anything else")
        .await
        .expect_err("must fail");

    match err {
        RequestFailure::Server(message) => assert!(message.contains("502"), "{message}"),
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn ask_against_closed_port_is_network_failure() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = backend(&format!("http://{addr}"))
        .ask("hello")
        .await
        .expect_err("must fail");

    assert!(matches!(err, RequestFailure::Network(_)), "{err:?}");
}

#[tokio::test]
async fn lists_conversations_with_user_query() {
    let (server_url, state) = spawn_chat_server().await.expect("spawn server");

    let conversations = backend(&server_url)
        .list_conversations()
        .await
        .expect("list");

    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[1].id, ConversationId::new("b"));
    assert!(conversations[1].is_current);

    let requests = state.requests.lock().await;
    assert_eq!(requests[0].user_id.as_deref(), Some("user-7"));
}

#[tokio::test]
async fn switch_returns_ai_mode_and_encodes_id() {
    let (server_url, state) = spawn_chat_server().await.expect("spawn server");

    let mode = backend(&server_url)
        .switch_conversation(&ConversationId::new("conv 1"))
        .await
        .expect("switch");

    assert_eq!(mode, Some(AiMode::new("physics")));
    let requests = state.requests.lock().await;
    assert_eq!(requests[0].path, "/conversations/conv 1/switch");
}

#[tokio::test]
async fn fetch_conversation_returns_ordered_pairs() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let detail = backend(&server_url)
        .fetch_conversation(&ConversationId::new("a"))
        .await
        .expect("fetch");

    let questions: Vec<&str> = detail.messages.iter().map(|m| m.question.as_str()).collect();
    assert_eq!(questions, vec!["hi", "2+2?"]);
    assert_eq!(detail.ai_mode, Some(AiMode::new("math")));
}

#[tokio::test]
async fn delete_failure_carries_server_message() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let err = backend(&server_url)
        .delete_conversation(&ConversationId::new("missing"))
        .await
        .expect_err("must fail");

    let api = err.downcast_ref::<ApiException>().expect("api exception");
    assert_eq!(api.status, 404);
    assert_eq!(api.message, "conversation not found");
}

#[tokio::test]
async fn calendar_process_exposes_auth_requirement() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let reply = backend(&server_url)
        .process_calendar("meeting tomorrow")
        .await
        .expect("reply");

    assert_eq!(reply.message, "need auth for 'meeting tomorrow'");
    assert_eq!(reply.required_auth_url(), Some("https://auth.example/start"));
}

#[tokio::test]
async fn calendar_auth_url_failure_is_an_error() {
    let (server_url, _state) = spawn_chat_server().await.expect("spawn server");

    let err = backend(&server_url)
        .calendar_auth_url()
        .await
        .expect_err("must fail");

    assert!(err.to_string().contains("oauth client not configured"));
}

#[test]
fn rejects_urls_that_cannot_carry_paths() {
    assert!(HttpChatBackend::new(
        "mailto:someone@example.com",
        UserId::new("u"),
        SessionId::new("s")
    )
    .is_err());
    assert!(HttpChatBackend::new("not a url", UserId::new("u"), SessionId::new("s")).is_err());
}
