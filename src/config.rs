use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHAT_URL: &str = "https://api.monica.im/api/custom_bot/chat";
pub const DEFAULT_CUSTOM_BOT_URL: &str = "https://api.monica.im/api/custom_bot/preview_chat";
pub const DEFAULT_IMAGE_GENERATE_URL: &str = "https://api.monica.im/api/image_tools/text_to_image";
pub const DEFAULT_IMAGE_RESULT_URL: &str = "https://api.monica.im/api/image_tools/loop_result";

const MAX_RATE_LIMIT_RPS: u32 = 10_000;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub http_client: HttpClientConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Client-facing model name -> backend model id.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub cookie: String,
    pub chat_url: String,
    pub custom_bot_url: String,
    pub image_generate_url: String,
    pub image_result_url: String,
    pub locale: String,
    /// Default bot for the custom-bot endpoints.
    pub bot_uid: String,
    /// Route `/v1/chat/completions` through the custom-bot endpoint.
    pub custom_bot_mode: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            chat_url: DEFAULT_CHAT_URL.to_string(),
            custom_bot_url: DEFAULT_CUSTOM_BOT_URL.to_string(),
            image_generate_url: DEFAULT_IMAGE_GENERATE_URL.to_string(),
            image_result_url: DEFAULT_IMAGE_RESULT_URL.to_string(),
            locale: "en_US".to_string(),
            bot_uid: String::new(),
            custom_bot_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub bearer_token: String,
    pub tls_skip_verify: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_rps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_burst: Option<u32>,
}

impl SecurityConfig {
    /// Burst size of each client's bucket; defaults to the per-second rate.
    pub fn effective_burst(&self) -> u32 {
        self.rate_limit_burst.unwrap_or(self.rate_limit_rps).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Overall timeout for streaming chat calls.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Timeout for each image submit/poll call.
    pub request_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 180,
            connect_timeout_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub flush_interval_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            max_line_bytes: 4 * 1024 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub poll_interval_ms: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl ImagesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
    pub request_log: bool,
    /// JSONL file receiving one record per completed request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            request_log: true,
            access_log: None,
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Unset fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the first config file found (or defaults), apply environment
    /// overrides and validate.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate(explicit_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides; `lookup` returns the value of a variable.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = var("SERVER_HOST") {
            self.server.host = host;
        }
        for key in ["PORT", "SERVER_PORT"] {
            if let Some(port) = var(key).and_then(|p| p.parse().ok()) {
                self.server.port = port;
            }
        }
        if let Some(cookie) = var("MONICA_COOKIE") {
            self.backend.cookie = cookie;
        }
        if let Some(bot_uid) = var("BOT_UID") {
            self.backend.bot_uid = bot_uid;
        }
        if let Some(token) = var("BEARER_TOKEN") {
            self.security.bearer_token = token;
        }
        if let Some(skip) = var("TLS_SKIP_VERIFY").and_then(|v| v.parse().ok()) {
            self.security.tls_skip_verify = skip;
        }
        if let Some(enabled) = var("RATE_LIMIT_ENABLED").and_then(|v| v.parse().ok()) {
            self.security.rate_limit_enabled = enabled;
        }
        if let Some(rps) = var("RATE_LIMIT_RPS").and_then(|v| v.parse().ok()) {
            self.security.rate_limit_rps = rps;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check required settings, collecting every problem into one error.
    /// A zero rate silently turns rate limiting off.
    pub fn validate(&mut self) -> Result<()> {
        let mut problems = Vec::new();

        if self.backend.cookie.is_empty() {
            problems.push("MONICA_COOKIE is required".to_string());
        }
        if self.security.bearer_token.is_empty() {
            problems.push("BEARER_TOKEN is required".to_string());
        }
        if self.backend.custom_bot_mode && self.backend.bot_uid.is_empty() {
            problems.push("BOT_UID is required when custom_bot_mode is enabled".to_string());
        }
        if self.server.port == 0 {
            problems.push("SERVER_PORT must be between 1 and 65535".to_string());
        }
        if self.security.rate_limit_rps == 0 {
            self.security.rate_limit_enabled = false;
        }
        if self.security.rate_limit_rps > MAX_RATE_LIMIT_RPS {
            problems.push(format!(
                "RATE_LIMIT_RPS should not exceed {MAX_RATE_LIMIT_RPS}"
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            problems.push(format!("LOG_LEVEL must be one of: {}", LOG_LEVELS.join(", ")));
        }
        if self.stream.flush_interval_ms == 0 {
            problems.push("stream.flush_interval_ms must be positive".to_string());
        }
        if self.images.poll_interval_ms == 0 {
            problems.push("images.poll_interval_ms must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::config(problems.join("; ")))
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.security.rate_limit_enabled && self.security.rate_limit_rps > 0
    }
}

/// Find the config file to load.
/// Priority: CLI arg > CONFIG_FILE env > CWD > XDG config > home dir
pub fn locate(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("CONFIG_FILE") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    config_search_paths().into_iter().find(|p| p.exists())
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("monica-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("monica-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("monica-proxy").join("config.toml"));
        paths.push(home.join(".monica-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
