use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use monica_proxy::{build_router, AppState, ProxyConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const TOKEN: &str = "test-token";
const COOKIE: &str = "session=test";

const GREETING_STREAM: &str = "data: {\"text\":\"Hi\"}\n\
data: {\"text\":\" there\"}\n\
data: {\"finished\":true}\n\
data: [DONE]\n";

const THINKING_STREAM: &str = "data: {\"text\":\"\",\"agent_status\":{\"uid\":\"a\",\"type\":\"thinking\",\"text\":\"\",\"metadata\":{\"title\":\"\",\"reasoning_detail\":\"\"}}}\n\
data: {\"text\":\"\",\"agent_status\":{\"uid\":\"a\",\"type\":\"thinking_detail_stream\",\"text\":\"\",\"metadata\":{\"title\":\"Plan\",\"reasoning_detail\":\"step one\"}}}\n\
data: {\"text\":\"answer\"}\n\
data: {\"text\":\" more\"}\n\
data: {\"finished\":true}\n\
data: [DONE]\n";

const TRUNCATED_STREAM: &str = "data: {\"text\":\"partial\"}\n";

// ────────────────────────────────────────────────────────────────
// Fake Monica backend
// ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeBackend {
    chat_requests: Mutex<Vec<Value>>,
    custom_bot_requests: Mutex<Vec<Value>>,
    cookies: Mutex<Vec<String>>,
    polls: AtomicUsize,
    /// Notified when the body of an open-ended stream is dropped.
    stream_closed: Arc<Notify>,
}

fn sse(body: &'static str) -> Response {
    ([("content-type", "text/event-stream")], body).into_response()
}

fn last_message(body: &Value) -> String {
    body["data"]["items"]
        .as_array()
        .and_then(|items| items.last())
        .and_then(|item| item["data"]["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

struct CloseSignal(Arc<Notify>);

impl Drop for CloseSignal {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// One frame, then the stream stays open until the connection goes away.
fn open_ended_stream(fake: &FakeBackend) -> Response {
    let signal = CloseSignal(fake.stream_closed.clone());
    let first = futures::stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(b"data: {\"text\":\"first\"}\n"))
    });
    let body = first.chain(futures::stream::pending()).map(move |chunk| {
        let _held = &signal;
        chunk
    });
    ([("content-type", "text/event-stream")], Body::from_stream(body)).into_response()
}

fn chat_reply(fake: &FakeBackend, body: &Value) -> Response {
    match last_message(body).as_str() {
        "fail" => (StatusCode::SERVICE_UNAVAILABLE, "backend overloaded").into_response(),
        "hang" => open_ended_stream(fake),
        "think" => sse(THINKING_STREAM),
        "truncate" => sse(TRUNCATED_STREAM),
        "garbage" => sse("data: {\"text\":\"ok\"}\ndata: {not-json}\n"),
        _ => sse(GREETING_STREAM),
    }
}

fn record_cookie(fake: &FakeBackend, headers: &HeaderMap) {
    let cookie = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    fake.cookies.lock().unwrap().push(cookie);
}

async fn fake_chat(
    State(fake): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_cookie(&fake, &headers);
    fake.chat_requests.lock().unwrap().push(body.clone());
    chat_reply(&fake, &body)
}

async fn fake_custom_bot(
    State(fake): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_cookie(&fake, &headers);
    fake.custom_bot_requests.lock().unwrap().push(body.clone());
    chat_reply(&fake, &body)
}

async fn fake_image_generate(Json(body): Json<Value>) -> Json<Value> {
    match body["prompt"].as_str().unwrap_or_default() {
        "rejected" => Json(json!({"code": 1001, "msg": "prompt rejected"})),
        // Deadline collapses to one poll interval; the poll never completes.
        "slow" => Json(json!({"code": 0, "msg": "", "data": {"image_tools_id": 99, "expected_time": 0}})),
        _ => Json(json!({"code": 0, "msg": "", "data": {"image_tools_id": 42, "expected_time": 5}})),
    }
}

async fn fake_image_result(
    State(fake): State<Arc<FakeBackend>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let polls = fake.polls.fetch_add(1, Ordering::SeqCst);
    let ready = body["image_tools_id"] == 42 && polls >= 1;
    let urls: Vec<&str> = if ready {
        vec!["https://cdn.example/1.png"]
    } else {
        vec![]
    };
    Json(json!({"code": 0, "msg": "", "data": {"record": {"result": {"cdn_url_list": urls}}}}))
}

async fn spawn_backend() -> (String, Arc<FakeBackend>) {
    let fake = Arc::new(FakeBackend::default());
    let app = Router::new()
        .route("/chat", post(fake_chat))
        .route("/custom", post(fake_custom_bot))
        .route("/image/generate", post(fake_image_generate))
        .route("/image/result", post(fake_image_result))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), fake)
}

/// A backend that accepts connections and never answers.
async fn spawn_silent_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

// ────────────────────────────────────────────────────────────────
// Proxy under test
// ────────────────────────────────────────────────────────────────

fn proxy_config(backend: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.backend.cookie = COOKIE.to_string();
    config.backend.chat_url = format!("{backend}/chat");
    config.backend.custom_bot_url = format!("{backend}/custom");
    config.backend.image_generate_url = format!("{backend}/image/generate");
    config.backend.image_result_url = format!("{backend}/image/result");
    config.security.bearer_token = TOKEN.to_string();
    config.stream.flush_interval_ms = 10;
    config.images.poll_interval_ms = 20;
    config
        .models
        .insert("my-model".to_string(), "backend-special".to_string());
    config
}

struct Harness {
    base: String,
    fake: Arc<FakeBackend>,
    state: Arc<AppState>,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(customize: impl FnOnce(&mut ProxyConfig)) -> Self {
        let (backend, fake) = spawn_backend().await;
        let mut config = proxy_config(&backend);
        customize(&mut config);
        config.validate().unwrap();

        let state = Arc::new(AppState::new(config).unwrap());
        let app = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            fake,
            state,
            client: reqwest::Client::new(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base))
            .bearer_auth(TOKEN)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .bearer_auth(TOKEN)
    }
}

fn chat_body(content: &str, stream: bool) -> Value {
    json!({
        "model": "gpt-4o",
        "stream": stream,
        "messages": [
            {"role": "system", "content": "Be brief."},
            {"role": "user", "content": content},
        ],
    })
}

/// Split an SSE body into its `data: ` payloads.
fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| frame.strip_prefix("data: ").unwrap().to_string())
        .collect()
}

fn frame_content(payload: &str) -> (String, Value) {
    let frame: Value = serde_json::from_str(payload).unwrap();
    let content = frame["choices"][0]["delta"]["content"]
        .as_str()
        .unwrap()
        .to_string();
    (content, frame)
}

async fn error_code(resp: reqwest::Response) -> (StatusCode, Value) {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap();
    (status, body["error"].clone())
}

// ────────────────────────────────────────────────────────────────
// Chat completions
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_streaming_completion() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("Hello", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 0);

    let sent = h.fake.chat_requests.lock().unwrap()[0].clone();
    assert_eq!(sent["bot_uid"], "monica");
    assert_eq!(sent["data"]["use_model"], "gpt-4o");
    assert_eq!(sent["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(h.fake.cookies.lock().unwrap()[0], COOKIE);
}

#[tokio::test]
async fn test_streaming_completion_frames() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("Hello", true))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers()["cache-control"].to_str().unwrap(), "no-cache");

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 4);
    assert_eq!(payloads[3], "[DONE]");

    let frames: Vec<_> = payloads[..3].iter().map(|p| frame_content(p)).collect();
    let contents: Vec<&str> = frames.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(contents, ["Hi", " there", ""]);

    let id = &frames[0].1["id"];
    for (_, frame) in &frames {
        assert_eq!(frame["object"], "chat.completion.chunk");
        assert_eq!(&frame["id"], id);
        assert_eq!(frame["created"], frames[0].1["created"]);
        assert_eq!(frame["model"], "gpt-4o");
    }
    assert!(frames[0].1["choices"][0]["finish_reason"].is_null());
    assert!(frames[1].1["choices"][0]["finish_reason"].is_null());
    assert_eq!(frames[2].1["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_streaming_reasoning_markers() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("think", true))
        .send()
        .await
        .unwrap();

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.last().unwrap(), "[DONE]");

    let contents: Vec<String> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| frame_content(p).0)
        .collect();
    assert_eq!(contents, ["<think>", "step one", "</think>answer", " more", ""]);
}

#[tokio::test]
async fn test_non_streaming_hides_reasoning() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("think", false))
        .send()
        .await
        .unwrap();

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "answer more");
}

#[tokio::test]
async fn test_truncated_backend_stream_has_no_done() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("truncate", true))
        .send()
        .await
        .unwrap();

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 1);
    assert_eq!(frame_content(&payloads[0]).0, "partial");
}

#[tokio::test]
async fn test_malformed_backend_payload() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("garbage", false))
        .send()
        .await
        .unwrap();
    let (status, error) = error_code(resp).await;
    assert_eq!(status, 500);
    assert_eq!(error["code"], "decode_error");

    // Mid-stream the headers are already sent: the body just ends early.
    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("garbage", true))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("[DONE]"));
}

#[tokio::test]
async fn test_configured_model_mapping() {
    let h = Harness::start().await;

    let mut body = chat_body("Hello", false);
    body["model"] = json!("my-model");
    let resp = h.post("/v1/chat/completions").json(&body).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    let sent = h.fake.chat_requests.lock().unwrap()[0].clone();
    assert_eq!(sent["data"]["use_model"], "backend-special");
}

#[tokio::test]
async fn test_empty_messages_rejected_with_request_id() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .header("x-request-id", "req-empty-1")
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.headers()["x-request-id"], "req-empty-1");
    let (status, error) = error_code(resp).await;
    assert_eq!(status, 400);
    assert_eq!(error["code"], "empty_messages");
    assert_eq!(error["request_id"], "req-empty-1");
    assert!(h.fake.chat_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_generated_request_id_matches_header() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .body("{not json")
        .header("content-type", "application/json")
        .send()
        .await
        .unwrap();

    let header_id = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&header_id).is_ok());
    let (status, error) = error_code(resp).await;
    assert_eq!(status, 400);
    assert_eq!(error["code"], "invalid_request");
    assert_eq!(error["request_id"], header_id.as_str());
}

#[tokio::test]
async fn test_upstream_error_surfaces_status() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("fail", false))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 502);
    assert_eq!(error["code"], "upstream_error");
    assert_eq!(error["upstream_status"], 503);
    assert!(error["message"].as_str().unwrap().contains("backend overloaded"));
}

#[tokio::test]
async fn test_backend_timeout_is_upstream_error() {
    let silent = spawn_silent_backend().await;
    let h = Harness::start_with(move |c| {
        c.backend.chat_url = format!("{silent}/chat");
        c.http_client.timeout_secs = 1;
    })
    .await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("Hello", false))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 502);
    assert_eq!(error["code"], "upstream_error");
    assert!(error["message"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_client_disconnect_closes_backend_stream() {
    let h = Harness::start().await;

    let mut resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("hang", true))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut received = Vec::new();
    while !String::from_utf8_lossy(&received).contains("first") {
        let chunk = resp.chunk().await.unwrap().expect("stream ended early");
        received.extend_from_slice(&chunk);
    }
    drop(resp);

    tokio::time::timeout(Duration::from_secs(5), h.fake.stream_closed.notified())
        .await
        .expect("backend stream was not released after the client left");
}

// ────────────────────────────────────────────────────────────────
// Custom bot
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_custom_bot_route() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/custom-bot/bot-42")
        .json(&chat_body("Hello", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");

    let sent = h.fake.custom_bot_requests.lock().unwrap()[0].clone();
    assert_eq!(sent["bot_uid"], "bot-42");
    assert!(h.fake.chat_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_bot_without_uid_is_rejected() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/chat/custom-bot")
        .json(&chat_body("Hello", false))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 400);
    assert_eq!(error["code"], "invalid_request");
}

#[tokio::test]
async fn test_custom_bot_mode_routes_chat_completions() {
    let h = Harness::start_with(|c| {
        c.backend.custom_bot_mode = true;
        c.backend.bot_uid = "house-bot".to_string();
    })
    .await;

    let resp = h
        .post("/v1/chat/completions")
        .json(&chat_body("Hello", true))
        .send()
        .await
        .unwrap();
    assert!(resp.text().await.unwrap().ends_with("data: [DONE]\n\n"));

    let sent = h.fake.custom_bot_requests.lock().unwrap()[0].clone();
    assert_eq!(sent["bot_uid"], "house-bot");
}

// ────────────────────────────────────────────────────────────────
// Auth, rate limiting, health, models
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bearer_auth_required() {
    let h = Harness::start().await;

    let resp = h
        .client
        .post(format!("{}/v1/chat/completions", h.base))
        .json(&chat_body("Hello", false))
        .send()
        .await
        .unwrap();
    let (status, error) = error_code(resp).await;
    assert_eq!(status, 401);
    assert_eq!(error["code"], "unauthorized");

    let resp = h
        .client
        .get(format!("{}/v1/models", h.base))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    assert!(h.fake.chat_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::start().await;

    let resp = h
        .client
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_models_list() {
    let h = Harness::start().await;

    let body: Value = h.get("/v1/models").send().await.unwrap().json().await.unwrap();
    assert_eq!(body["object"], "list");

    let data = body["data"].as_array().unwrap();
    let ids: Vec<&str> = data.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"gpt-4o"));
    assert!(ids.contains(&"my-model"));

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    for model in data {
        assert_eq!(model["object"], "model");
        assert_eq!(model["owned_by"], "monica");
    }
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let h = Harness::start_with(|c| {
        c.security.rate_limit_enabled = true;
        c.security.rate_limit_rps = 1;
    })
    .await;

    let first = h
        .get("/v1/models")
        .header("x-real-ip", "10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = h
        .get("/v1/models")
        .header("x-real-ip", "10.0.0.1")
        .send()
        .await
        .unwrap();
    let (status, error) = error_code(second).await;
    assert_eq!(status, 429);
    assert_eq!(error["code"], "rate_limit_exceeded");
    assert_eq!(error["limit"], 1);
    assert_eq!(error["retry_after"], "1s");

    let other = h
        .get("/v1/models")
        .header("x-real-ip", "10.0.0.2")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);

    let registry = h.state.rate_limiter.as_ref().unwrap();
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_rate_limiting_disabled_creates_no_state() {
    let h = Harness::start().await;

    for _ in 0..5 {
        let resp = h.get("/v1/models").send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
    assert!(h.state.rate_limiter.is_none());
}

#[tokio::test]
async fn test_access_log_records_requests() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("access.jsonl");
    let log_path = path.clone();
    let h = Harness::start_with(move |c| c.logging.access_log = Some(log_path)).await;

    h.get("/v1/models")
        .header("x-request-id", "log-me")
        .send()
        .await
        .unwrap();
    h.client
        .get(format!("{}/v1/models", h.base))
        .send()
        .await
        .unwrap();

    let recent = h.state.request_log.as_ref().unwrap().recent(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].status, 401);
    assert_eq!(recent[1].status, 200);
    assert_eq!(recent[1].request_id, "log-me");
    assert_eq!(recent[1].path, "/v1/models");
    assert_eq!(recent[1].method, "GET");
    assert_eq!(recent[1].client, "127.0.0.1");

    let persisted = std::fs::read_to_string(&path).unwrap();
    assert_eq!(persisted.lines().count(), 2);
}

// ────────────────────────────────────────────────────────────────
// Images
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_image_generation_polls_until_ready() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/images/generations")
        .json(&json!({"prompt": "a lighthouse at dusk", "size": "1792x1024"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"][0]["url"], "https://cdn.example/1.png");
    assert_eq!(body["data"][0]["revised_prompt"], "a lighthouse at dusk");
    assert!(body["created"].as_i64().unwrap() > 0);
    assert!(h.fake.polls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_image_generation_times_out() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/images/generations")
        .json(&json!({"prompt": "slow"}))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 500);
    assert_eq!(error["code"], "timeout");
}

#[tokio::test]
async fn test_image_generation_rejected_by_backend() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/images/generations")
        .json(&json!({"prompt": "rejected"}))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 500);
    assert_eq!(error["code"], "image_generation_failed");
    assert!(error["message"].as_str().unwrap().contains("prompt rejected"));
}

#[tokio::test]
async fn test_image_generation_requires_prompt() {
    let h = Harness::start().await;

    let resp = h
        .post("/v1/images/generations")
        .json(&json!({"prompt": ""}))
        .send()
        .await
        .unwrap();

    let (status, error) = error_code(resp).await;
    assert_eq!(status, 400);
    assert_eq!(error["code"], "empty_prompt");
}
