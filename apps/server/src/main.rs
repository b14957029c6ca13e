//! Clipcaster Server - standalone headless chat-clip-playback automation daemon.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clipcaster_core::{bootstrap_services, LoggingEventEmitter};
use tokio::signal;

use crate::config::ServerConfig;

/// Clipcaster Server - chat-driven clip playback and scene automation.
#[derive(Parser, Debug)]
#[command(name = "clipcaster-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CLIPCASTER_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Data directory for persistent state (encrypted token store).
    #[arg(short = 'd', long, env = "CLIPCASTER_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Clipcaster Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(data_dir) = args.data_dir {
        config.inner.data_dir = Some(data_dir);
    }

    let emitter = Arc::new(LoggingEventEmitter);
    let (services, coordinator, scene_supervisor) = bootstrap_services(config.inner, emitter)
        .await
        .context("failed to bootstrap services")?;

    log::info!("services bootstrapped successfully");

    services.start(coordinator, scene_supervisor);

    shutdown_signal().await;

    log::info!("shutdown signal received, cleaning up");
    services.shutdown().await;

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
