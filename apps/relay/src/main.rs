//! ntnl relay server
//!
//! Listens on one port for both tunnel control connections and public
//! traffic addressed to `{subdomain}.{domain}`.

use anyhow::{Context, Result};
use clap::Parser;
use ntnl_relay::Relay;
use ntnl_relay::config::{RelayArgs, RelayConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = RelayArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("ntnl relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_args(&args);
    info!("Public domain: {}://*.{}", config.scheme, config.domain);
    info!("Request timeout: {:?}", config.request_timeout);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    Relay::new(config)
        .serve(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down gracefully...");
            }
        })
        .await
        .context("Relay server failed")?;

    Ok(())
}
