mod audit;
mod bridge;
mod config;
mod error;
mod http;
mod plugins;
mod sandbox;
mod session;
mod transport;
mod vfs;

use crate::audit::AuditLog;
use crate::bridge::CommandBridge;
use crate::config::Config;
use crate::http::AppState;
use crate::plugins::{ManifestPluginDirectory, PluginDirectory};
use crate::session::SessionRegistry;
use crate::transport::FileTransfer;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shellgate={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting shellgate");
    tracing::debug!("Loaded configuration: {:?}", config);
    if !config.web_root.is_dir() {
        tracing::warn!(path = %config.web_root.display(), "WEB_ROOT is not a directory; application bundle requests will 404");
    }

    let plugins: Arc<dyn PluginDirectory> = Arc::new(
        ManifestPluginDirectory::load(&config.plugin_manifest)
            .context("Failed to load plugin manifest")?,
    );
    let registry = Arc::new(SessionRegistry::new());
    let bridge = CommandBridge::new(
        plugins.clone(),
        registry.clone(),
        Duration::from_millis(config.channel_open_timeout_ms),
        Duration::from_millis(config.command_timeout_ms),
    );
    let files = FileTransfer::new(&config);
    let audit = Arc::new(AuditLog::new(&config));

    session::sweeper::spawn(
        registry.clone(),
        Duration::from_secs(config.session_idle_timeout_secs),
        Duration::from_secs(config.session_sweep_interval_secs),
    );

    let address = format!("{}:{}", config.listen_address, config.listen_port);
    let state = Arc::new(AppState {
        config,
        registry,
        plugins,
        bridge,
        files,
        audit,
    });
    let app = http::router(state);

    tracing::info!(address = %address, "http_server_start");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    tracing::info!("Server shutdown.");
    Ok(())
}
