use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tower::ServiceExt;

use pitchdesk_core_sdk::client::{ChatClient, ChatSession};
use pitchdesk_core_sdk::config::{AppConfig, Credentials, ProviderEndpoints, RunMode};
use pitchdesk_core_sdk::models::Role;
use pitchdesk_core_sdk::notice::{classify, NoticeKind};
use pitchdesk_core_sdk::prompts::PROMPT;
use pitchdesk_core_sdk::render::{render, Bubble};
use pitchdesk_core_sdk::server::{router, AppState};
use pitchdesk_core_sdk::store::{ChatStore, StoreEvent};

const HELLO_SSE: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2}}\n\n",
    "data: [DONE]\n\n",
);

type Captured = Arc<Mutex<Vec<(String, Value)>>>;

/** \brief 本地模拟的 OpenAI 兼容模型服务，记录鉴权头与请求体。 */
async fn spawn_provider(status: StatusCode, body: &'static str) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: axum::http::HeaderMap, Json(req): Json<Value>| {
            let sink = sink.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                sink.lock().expect("lock").push((auth, req));
                (status, [(header::CONTENT_TYPE, "text/event-stream")], body)
            }
        }),
    );
    let base = serve(app).await;
    (base, captured)
}

/**
 * \brief 每次请求由 make_body 生成一个流式响应体，用于模拟慢速或不结束的服务。
 */
async fn spawn_streaming_provider<F>(make_body: F) -> String
where
    F: Fn() -> Body + Clone + Send + Sync + 'static,
{
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let make_body = make_body.clone();
            async move {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    make_body(),
                )
            }
        }),
    );
    serve(app).await
}

fn delta_frame(text: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    ))
}

/** \brief 被丢弃时置位，用来观察上游响应体是否被关闭。 */
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{}", addr)
}

fn config(groq: Option<&str>, base: &str, run_mode: RunMode) -> AppConfig {
    AppConfig {
        credentials: Credentials {
            groq_api_key: groq.map(str::to_string),
            openai_api_key: None,
        },
        endpoints: ProviderEndpoints {
            groq_base: base.to_string(),
            openai_base: base.to_string(),
        },
        run_mode,
        ..AppConfig::default()
    }
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn text_message(id: &str, role: &str, text: &str) -> Value {
    json!({ "id": id, "role": role, "parts": [{ "type": "text", "text": text }] })
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn missing_credentials_return_503_with_hint() {
    let app = router(AppState::new(config(None, "http://127.0.0.1:9", RunMode::Production)));
    let resp = app
        .oneshot(chat_request(json!({ "messages": [text_message("1", "user", "hi")] })))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_str(&body_text(resp).await).expect("json");
    assert!(body["error"].as_str().expect("error").contains("Missing API key"));
    assert!(body["hint"].as_str().expect("hint").contains("GROQ_API_KEY"));
}

#[tokio::test]
async fn conversation_without_user_message_returns_404() {
    let app = router(AppState::new(config(
        Some("gsk"),
        "http://127.0.0.1:9",
        RunMode::Production,
    )));
    let resp = app
        .oneshot(chat_request(json!({ "messages": [text_message("1", "assistant", "hi")] })))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "No user message found");
}

#[tokio::test]
async fn malformed_body_returns_500() {
    let app = router(AppState::new(config(
        Some("gsk"),
        "http://127.0.0.1:9",
        RunMode::Production,
    )));
    let resp = app
        .oneshot(chat_request(json!({ "conversation": [] })))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(resp).await).expect("json");
    assert!(body["error"].as_str().expect("error").contains("messages"));
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn successful_generation_streams_data_protocol() {
    let (base, captured) = spawn_provider(StatusCode::OK, HELLO_SSE).await;
    let app = router(AppState::new(config(Some(" gsk-live "), &base, RunMode::Production)));
    let resp = app
        .oneshot(chat_request(json!({ "messages": [
            text_message("1", "user", "hi"),
            text_message("2", "assistant", "hello"),
            text_message("3", "user", "bye"),
        ] })))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("x-vercel-ai-data-stream")
            .and_then(|v| v.to_str().ok()),
        Some("v1")
    );

    let text = body_text(resp).await;
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("f:{\"messageId\":\"msgs-"));
    assert_eq!(lines[1], "0:\"Hel\"");
    assert_eq!(lines[2], "0:\"lo\"");
    assert!(lines[3].starts_with("e:"));
    assert!(lines[4].starts_with("d:"));
    assert!(lines[4].contains("\"finishReason\":\"stop\""));
    assert!(lines[4].contains("\"completionTokens\":2"));

    let calls = captured.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    let (auth, req) = &calls[0];
    assert_eq!(auth, "Bearer gsk-live");
    assert_eq!(req["model"], "llama-3.1-8b-instant");
    assert_eq!(req["stream"], true);
    let messages = req["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], PROMPT);
    assert_eq!(messages[3]["content"], "bye");
}

#[tokio::test]
async fn provider_failure_goes_through_stream_error_channel() {
    let (base, _) = spawn_provider(StatusCode::UNAUTHORIZED, "{\"error\":\"bad key\"}").await;
    let body = json!({ "messages": [text_message("1", "user", "hi")] });

    let prod = router(AppState::new(config(Some("gsk"), &base, RunMode::Production)));
    let resp = prod.oneshot(chat_request(body.clone())).await.expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert!(text.ends_with("3:\"An error occurred.\"\n"));

    let dev = router(AppState::new(config(Some("gsk"), &base, RunMode::Development)));
    let resp = dev.oneshot(chat_request(body)).await.expect("response");
    let text = body_text(resp).await;
    assert!(text.contains("3:\"request failed: 401 Unauthorized"));
}

#[tokio::test]
async fn health_reports_selected_provider() {
    let app = router(AppState::new(config(None, "http://127.0.0.1:9", RunMode::Production)));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let mut cfg = config(None, "http://127.0.0.1:9", RunMode::Production);
    cfg.credentials.openai_api_key = Some("sk".to_string());
    let app = router(AppState::new(cfg));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(resp).await).expect("json");
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn session_edit_regenerates_trailing_reply() {
    let (provider_base, captured) = spawn_provider(StatusCode::OK, HELLO_SSE).await;
    let server_base = serve(router(AppState::new(config(
        Some("gsk"),
        &provider_base,
        RunMode::Production,
    ))))
    .await;

    let client = ChatClient::new(&server_base).expect("client");
    let mut session = ChatSession::new(client, ChatStore::new());
    session.send("A").await;

    let msgs = session.store().messages().to_vec();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[1].role, Role::Assistant);
    assert_eq!(msgs[1].text(), "Hello");
    assert!(!session.store().is_generating());

    let view = render(&msgs, session.store().is_generating());
    assert_eq!(
        view.messages[0].bubbles,
        vec![Bubble::User {
            text: "A".to_string(),
            show_actions: true
        }]
    );

    let user_id = msgs[0].id.clone();
    assert!(session.edit(&user_id, "A2").await);
    let msgs = session.store().messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].text(), "A2");
    assert_eq!(msgs[1].text(), "Hello");

    let calls = captured.lock().expect("lock");
    assert_eq!(calls.len(), 2);
    let resent = calls[1].1["messages"].as_array().expect("messages");
    assert_eq!(resent.len(), 2);
    assert_eq!(resent[1]["content"], "A2");
}

#[tokio::test]
async fn session_surfaces_config_error_for_classifier() {
    let server_base = serve(router(AppState::new(config(
        None,
        "http://127.0.0.1:9",
        RunMode::Production,
    ))))
    .await;

    let raised = Arc::new(Mutex::new(Vec::new()));
    let sink = raised.clone();
    let mut store = ChatStore::new();
    store.subscribe(Box::new(move |ev: &StoreEvent| {
        if let StoreEvent::ErrorRaised(msg) = ev {
            sink.lock().expect("lock").push(classify(msg));
        }
    }));

    let client = ChatClient::new(&server_base).expect("client");
    let mut session = ChatSession::new(client, store);
    session.send("hi").await;

    let notices = raised.lock().expect("lock");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Unavailable);
    assert_eq!(session.store().messages().len(), 1);
    assert!(session.store().error().expect("error").starts_with("503"));
}

#[tokio::test]
async fn stalled_provider_hits_deadline() {
    let base = spawn_streaming_provider(|| {
        let body = stream::once(async { Ok::<_, Infallible>(delta_frame("x")) })
            .chain(stream::pending());
        Body::from_stream(body)
    })
    .await;
    let mut cfg = config(Some("gsk"), &base, RunMode::Development);
    cfg.max_duration = Duration::from_millis(500);

    let resp = router(AppState::new(cfg))
        .oneshot(chat_request(json!({ "messages": [text_message("1", "user", "hi")] })))
        .await
        .expect("response");
    let text = tokio::time::timeout(Duration::from_secs(5), body_text(resp))
        .await
        .expect("relay must stop at the deadline");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("f:{\"messageId\":\"msgs-"));
    assert_eq!(lines[1], "0:\"x\"");
    assert_eq!(lines[2], "3:\"request exceeded 500ms\"");
}

#[tokio::test]
async fn client_disconnect_closes_provider_stream() {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    let base = spawn_streaming_provider(move || {
        let guard = DropFlag(flag.clone());
        let body = stream::unfold(guard, |guard| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((Ok::<_, Infallible>(delta_frame("tick")), guard))
        });
        Body::from_stream(body)
    })
    .await;

    let resp = router(AppState::new(config(Some("gsk"), &base, RunMode::Production)))
        .oneshot(chat_request(json!({ "messages": [text_message("1", "user", "hi")] })))
        .await
        .expect("response");
    let mut body = resp.into_body().into_data_stream();
    let mut seen = String::new();
    while !seen.contains("0:\"tick\"") {
        let chunk = body.next().await.expect("chunk").expect("bytes");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(!closed.load(Ordering::SeqCst));
    drop(body);

    let mut waited = Duration::ZERO;
    while !closed.load(Ordering::SeqCst) {
        assert!(
            waited < Duration::from_secs(5),
            "provider stream still open after client went away"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
}
