//! Error types for the proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("messages must not be empty")]
    EmptyMessages,

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Too many requests (limit {limit} req/s)")]
    RateLimited { limit: u32 },

    #[error("Upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Image generation failed: {message}")]
    ImageGeneration { message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    pub fn upstream(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn image_generation(msg: impl Into<String>) -> Self {
        Self::ImageGeneration {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } | Self::EmptyMessages | Self::EmptyPrompt => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { .. } | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::EmptyMessages => "empty_messages",
            Self::EmptyPrompt => "empty_prompt",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::Upstream { .. } | Self::Http(_) => "upstream_error",
            Self::Decode { .. } => "decode_error",
            Self::ImageGeneration { .. } => "image_generation_failed",
            Self::Timeout { .. } => "timeout",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

/// A [`ProxyError`] bound to the request it failed, ready to be rendered.
#[derive(Debug)]
pub struct ApiError {
    pub error: ProxyError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: ProxyError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (limit, retry_after) = match self.error {
            ProxyError::RateLimited { limit } => (Some(limit), Some("1s")),
            _ => (None, None),
        };
        let upstream_status = match self.error {
            ProxyError::Upstream { status, .. } => status,
            _ => None,
        };

        ErrorBody {
            error: ErrorDetail {
                code: self.error.code(),
                message: self.error.to_string(),
                request_id: self.request_id.clone(),
                limit,
                retry_after,
                upstream_status,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(
                request_id = %self.request_id,
                code = self.error.code(),
                error = %self.error,
                "request failed"
            );
        } else {
            tracing::warn!(
                request_id = %self.request_id,
                code = self.error.code(),
                error = %self.error,
                "request rejected"
            );
        }
        (status, Json(self.body())).into_response()
    }
}
