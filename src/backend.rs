//! Outbound HTTP client for the Monica backend.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::backend_types::{BackendChatRequest, BackendEvent};
use crate::translate::sse::{backend_events, SseLimits};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const ERROR_BODY_LIMIT: usize = 500;

/// Byte stream of a backend response body, readable line by line.
pub type EventReader =
    StreamReader<Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>, Bytes>;

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    cookie: String,
    chat_url: String,
    custom_bot_url: String,
    image_generate_url: String,
    image_result_url: String,
    request_timeout: Duration,
    limits: SseLimits,
}

impl BackendClient {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream,application/json"),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        let locale = HeaderValue::from_str(&config.backend.locale)
            .map_err(|e| ProxyError::config(format!("invalid backend.locale: {e}")))?;
        headers.insert("x-client-locale", locale);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.security.tls_skip_verify)
            .connect_timeout(Duration::from_secs(config.http_client.connect_timeout_secs))
            .timeout(Duration::from_secs(config.http_client.timeout_secs))
            .build()?;

        if config.security.tls_skip_verify {
            tracing::warn!("TLS certificate verification is disabled for backend calls");
        }

        Ok(Self {
            http,
            cookie: config.backend.cookie.clone(),
            chat_url: config.backend.chat_url.clone(),
            custom_bot_url: config.backend.custom_bot_url.clone(),
            image_generate_url: config.backend.image_generate_url.clone(),
            image_result_url: config.backend.image_result_url.clone(),
            request_timeout: Duration::from_secs(config.http_client.request_timeout_secs),
            limits: SseLimits {
                max_line_bytes: config.stream.max_line_bytes,
            },
        })
    }

    pub fn image_generate_url(&self) -> &str {
        &self.image_generate_url
    }

    pub fn image_result_url(&self) -> &str {
        &self.image_result_url
    }

    /// Start a chat on the default chat endpoint.
    pub async fn send_chat(&self, req: &BackendChatRequest) -> Result<reqwest::Response> {
        self.send_streaming(&self.chat_url, req).await
    }

    /// Start a chat on the custom-bot endpoint.
    pub async fn send_custom_bot(&self, req: &BackendChatRequest) -> Result<reqwest::Response> {
        self.send_streaming(&self.custom_bot_url, req).await
    }

    async fn send_streaming(&self, url: &str, req: &BackendChatRequest) -> Result<reqwest::Response> {
        tracing::debug!(url, model = %req.data.use_model, bot_uid = %req.bot_uid, "sending chat request");

        let response = self
            .http
            .post(url)
            .header(header::COOKIE, &self.cookie)
            .json(req)
            .send()
            .await
            .map_err(send_error)?;

        check_status(response).await
    }

    /// POST `body` and decode the JSON reply, bounded by the request timeout.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .header(header::COOKIE, &self.cookie)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(send_error)?;

        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(send_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProxyError::decode(format!("invalid backend JSON from {url}: {e}")))
    }

    /// Decode the SSE body of a chat response as backend events.
    pub fn events(
        &self,
        response: reqwest::Response,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<BackendEvent>> {
        backend_events(event_reader(response), cancel, self.limits)
    }
}

/// Adapt a response body into an `AsyncBufRead`.
pub fn event_reader(response: reqwest::Response) -> EventReader {
    let body: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>> =
        Box::pin(response.bytes_stream().map_err(io::Error::other));
    StreamReader::new(body)
}

/// Transport failures, timeouts included, are upstream errors.
fn send_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::upstream(None, format!("backend request timed out: {err}"))
    } else {
        ProxyError::upstream(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), "backend returned an error status");
    Err(ProxyError::upstream(
        Some(status.as_u16()),
        format!("backend returned {status}: {}", truncate(&body, ERROR_BODY_LIMIT)),
    ))
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
