use clap::Parser;
use monica_proxy::config::config_search_paths;
use monica_proxy::ratelimit::SWEEP_INTERVAL;
use monica_proxy::{build_router, AppState, ProxyConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "monica-proxy",
    about = "OpenAI-compatible API proxy for the Monica chat backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

fn init_tracing(config: &ProxyConfig) {
    let level = &config.logging.level;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("monica_proxy={level},tower_http={level}")));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  --config <path> or $CONFIG_FILE");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config);

    let bind_addr = config.bind_address();
    info!(version = env!("CARGO_PKG_VERSION"), "starting monica-proxy");
    info!("  Chat URL:    {}", config.backend.chat_url);
    info!("  Locale:      {}", config.backend.locale);
    info!("  Custom bot:  {}", if config.backend.custom_bot_mode { "on" } else { "off" });
    info!(
        "  Rate limit:  {}",
        if config.rate_limiting_enabled() {
            format!(
                "{} req/s, burst {}",
                config.security.rate_limit_rps,
                config.security.effective_burst()
            )
        } else {
            "disabled".to_string()
        }
    );
    info!("  Models:      {} configured", config.models.len());
    if let Some(path) = &config.logging.access_log {
        info!("  Access log:  {}", path.display());
    }

    let state = Arc::new(AppState::new(config)?);

    let shutdown = CancellationToken::new();
    let sweeper = state
        .rate_limiter
        .as_ref()
        .map(|registry| registry.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone()));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }
    info!("server stopped");

    Ok(())
}
