pub mod backend;
pub mod config;
pub mod error;
pub mod images;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod server;
pub mod translate;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use logging::RequestLog;
pub use ratelimit::RateLimiterRegistry;
pub use server::{build_router, AppState};
