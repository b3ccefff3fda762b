//! backhaul starter daemon
//!
//! The starter runs on an outbound-only host, dials the redirector, and
//! makes the configured local backends reachable through the redirector's
//! public ports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bh_core::config::{self, Endpoint, StarterConfig};
use bh_starter::Starter;

#[derive(Parser)]
#[command(name = "bh-starter")]
#[command(about = "backhaul starter daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redirector control endpoint as host:port (overrides config)
    #[arg(short, long)]
    redirect_to: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Parse a host:port override
fn parse_endpoint(value: &str) -> Result<Endpoint> {
    let (address, port) = value
        .rsplit_once(':')
        .with_context(|| format!("Expected host:port, got {:?}", value))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Bad port in {:?}", value))?;
    Ok(Endpoint {
        address: address.to_string(),
        port,
    })
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

    tracing::info!("backhaul starter starting...");

    let config_path = args.config.unwrap_or_else(|| PathBuf::from("starter.json"));
    let mut config: StarterConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(redirect_to) = &args.redirect_to {
        config.redirect_to = parse_endpoint(redirect_to)?;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("Redirector endpoint: {}", config.redirect_to);
    tracing::info!("Advertising target ports {:?}", config.target_ports());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
    });

    Starter::new(config, cancel).run().await
}
