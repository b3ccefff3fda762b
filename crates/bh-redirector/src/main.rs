//! backhaul redirector daemon
//!
//! The redirector runs on a publicly reachable host, accepts the reverse
//! control connection from a starter, and exposes the starter's backends
//! on the advertised public ports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bh_core::config::{self, RedirectorConfig};
use bh_redirector::Redirector;

#[derive(Parser)]
#[command(name = "bh-redirector")]
#[command(about = "backhaul redirector daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control listener port (overrides config)
    #[arg(short, long)]
    listen: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("backhaul redirector starting...");

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from("redirector.json"));
    let mut config: RedirectorConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
    });

    let redirector = Redirector::bind(config, cancel)
        .await
        .context("Failed to start redirector")?;
    redirector.run().await
}
