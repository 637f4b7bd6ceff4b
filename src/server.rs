use crate::backend::BackendClient;
use crate::config::ProxyConfig;
use crate::error::{ApiError, ProxyError, Result};
use crate::images::generate_image;
use crate::logging::RequestLog;
use crate::middleware::{self, request_id};
use crate::models::model_list;
use crate::ratelimit::RateLimiterRegistry;
use crate::translate::openai_types::{ChatCompletionRequest, ImageGenerationRequest};
use crate::translate::request::{openai_to_backend, BotTarget};
use crate::translate::response::collect_completion;
use crate::translate::streaming::{emit_stream, StreamOutcome, TranslationSession};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Capacity of the pipe between the stream emitter task and the response body.
const STREAM_PIPE_SIZE: usize = 16 * 1024;

pub struct AppState {
    pub config: ProxyConfig,
    pub backend: BackendClient,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiterRegistry>>,
    /// `None` when the access log is disabled.
    pub request_log: Option<RequestLog>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let backend = BackendClient::new(&config)?;

        let rate_limiter = config.rate_limiting_enabled().then(|| {
            Arc::new(RateLimiterRegistry::new(
                config.security.rate_limit_rps,
                config.security.effective_burst(),
            ))
        });

        let request_log = if config.logging.request_log {
            Some(RequestLog::open(config.logging.access_log.as_deref())?)
        } else {
            None
        };

        Ok(Self {
            config,
            backend,
            rate_limiter,
            request_log,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Route layers run outermost-last: rate limiting happens before auth.
    let api = Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/chat/custom-bot", post(handle_custom_bot_default))
        .route("/v1/chat/custom-bot/:bot_uid", post(handle_custom_bot))
        .route("/v1/models", get(handle_models))
        .route("/v1/images/generations", post(handle_images))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_bearer))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(from_fn_with_state(state.clone(), middleware::log_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Backend endpoint a chat request is sent to.
#[derive(Debug, Clone)]
enum ChatEndpoint {
    Chat,
    CustomBot(String),
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::invalid_request(format!("invalid request body: {e}")))
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let backend = &state.config.backend;
    let endpoint = if backend.custom_bot_mode && !backend.bot_uid.is_empty() {
        ChatEndpoint::CustomBot(backend.bot_uid.clone())
    } else {
        ChatEndpoint::Chat
    };
    handle_chat(state, headers, body, endpoint).await
}

async fn handle_custom_bot(
    State(state): State<Arc<AppState>>,
    Path(bot_uid): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_chat(state, headers, body, ChatEndpoint::CustomBot(bot_uid)).await
}

async fn handle_custom_bot_default(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let bot_uid = state.config.backend.bot_uid.clone();
    if bot_uid.is_empty() {
        let err = ProxyError::invalid_request("bot_uid is required: pass it in the path or set backend.bot_uid");
        return ApiError::new(err, request_id(&headers)).into_response();
    }
    handle_chat(state, headers, body, ChatEndpoint::CustomBot(bot_uid)).await
}

async fn handle_chat(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
    endpoint: ChatEndpoint,
) -> Response {
    let request_id = request_id(&headers);
    match proxy_chat(&state, &body, &endpoint, &request_id).await {
        Ok(response) => response,
        Err(e) => ApiError::new(e, request_id).into_response(),
    }
}

async fn proxy_chat(
    state: &AppState,
    body: &[u8],
    endpoint: &ChatEndpoint,
    request_id: &str,
) -> Result<Response> {
    let req: ChatCompletionRequest = parse_body(body)?;

    let target = match endpoint {
        ChatEndpoint::Chat => BotTarget::Default,
        ChatEndpoint::CustomBot(uid) => BotTarget::Custom(uid),
    };
    let backend_req = openai_to_backend(
        &req,
        target,
        &state.config.backend.locale,
        &state.config.models,
    )?;

    tracing::info!(
        request_id,
        model = %req.model,
        backend_model = %backend_req.data.use_model,
        streaming = req.is_streaming(),
        messages = req.messages.len(),
        "chat request"
    );

    let response = match endpoint {
        ChatEndpoint::Chat => state.backend.send_chat(&backend_req).await?,
        ChatEndpoint::CustomBot(_) => state.backend.send_custom_bot(&backend_req).await?,
    };

    if req.is_streaming() {
        return Ok(stream_completion(state, response, &req.model, request_id));
    }

    let events = state.backend.events(response, CancellationToken::new());
    let completion = collect_completion(events, &req.model).await?;
    Ok(Json(completion).into_response())
}

/// Start the stream emitter for `response` and return the SSE response
/// that carries its output.
///
/// The emitter runs in its own task writing into a pipe whose read half is
/// the response body. Dropping the body cancels backend ingestion.
fn stream_completion(
    state: &AppState,
    response: reqwest::Response,
    model: &str,
    request_id: &str,
) -> Response {
    let cancel = CancellationToken::new();
    let events = state.backend.events(response, cancel.clone());
    let session = TranslationSession::new(model);
    let flush_interval = state.config.stream.flush_interval();
    let (writer, reader) = tokio::io::duplex(STREAM_PIPE_SIZE);

    let request_id = request_id.to_string();
    let disconnected = cancel.clone();
    tokio::spawn(async move {
        let stream_id = session.stream_id().to_string();
        match emit_stream(events, writer, session, flush_interval).await {
            Ok(StreamOutcome::Completed) => {
                tracing::debug!(%request_id, %stream_id, "stream completed");
            }
            Ok(StreamOutcome::Truncated) if disconnected.is_cancelled() => {
                tracing::info!(%request_id, %stream_id, "client disconnected");
            }
            Ok(StreamOutcome::Truncated) => {
                tracing::warn!(%request_id, %stream_id, "backend stream ended before completion");
            }
            Err(e) if disconnected.is_cancelled() => {
                tracing::info!(%request_id, %stream_id, error = %e, "client disconnected");
            }
            Err(e) => {
                tracing::error!(%request_id, %stream_id, code = e.code(), error = %e, "stream aborted");
            }
        }
    });

    let guard = cancel.drop_guard();
    let body = ReaderStream::new(reader).map(move |chunk| {
        let _cancel_on_drop = &guard;
        chunk
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    Json(model_list(&state.config.models)).into_response()
}

async fn handle_images(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);

    let result = async {
        let req: ImageGenerationRequest = parse_body(&body)?;
        tracing::info!(%request_id, n = req.n, size = %req.size, "image generation request");
        generate_image(&state.backend, req, state.config.images.poll_interval()).await
    }
    .await;

    match result {
        Ok(images) => Json(images).into_response(),
        Err(e) => ApiError::new(e, request_id).into_response(),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
