use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ntnl::config::{ConfigManager, resolve_server_url, validate_server_url};
use ntnl::serve::spawn_static_server;
use ntnl::{ClientConfig, ConnectionManager, ConnectionState};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Expose a local HTTP server through an ntnl relay
#[derive(Parser, Debug)]
#[command(name = "ntnl")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tunnel an HTTP server already listening on a local port
    Http {
        /// Local port to expose
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        /// Requested subdomain
        #[arg(short, long)]
        subdomain: Option<String>,

        /// Relay WebSocket URL
        #[arg(short = 'u', long = "url", env = "NTNL_SERVER_URL")]
        url: Option<String>,
    },

    /// Serve a directory locally and tunnel it
    Serve {
        /// Directory to serve
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Local port for the static server
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Requested subdomain
        #[arg(short, long)]
        subdomain: Option<String>,

        /// Relay WebSocket URL
        #[arg(short = 'u', long = "url", env = "NTNL_SERVER_URL")]
        url: Option<String>,
    },

    /// Show or set the default relay URL
    Config {
        /// New default relay WebSocket URL
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match args.command {
        Command::Http {
            port,
            subdomain,
            url,
        } => {
            let server_url = server_url(url.as_deref())?;
            tunnel(ClientConfig::new(server_url, port, subdomain)).await
        }
        Command::Serve {
            dir,
            port,
            subdomain,
            url,
        } => {
            let server_url = server_url(url.as_deref())?;
            let (addr, static_server) = spawn_static_server(&dir, port)
                .await
                .with_context(|| format!("Failed to serve {}", dir.display()))?;
            let result = tunnel(ClientConfig::new(server_url, addr.port(), subdomain)).await;
            static_server.abort();
            result
        }
        Command::Config { server } => {
            let manager = ConfigManager::new()?;
            match server {
                Some(url) => {
                    manager.set_server_url(&url)?;
                    println!("Default server set to {}", url);
                }
                None => {
                    let config = manager.load()?;
                    println!("{}", resolve_server_url(None, &config));
                }
            }
            Ok(())
        }
    }
}

/// Relay URL from the flag, the persisted config, or the built-in default
fn server_url(flag: Option<&str>) -> Result<String> {
    let persisted = ConfigManager::new()?.load()?;
    validate_server_url(&resolve_server_url(flag, &persisted))
}

/// Run the tunnel until Ctrl-C or a fatal error
async fn tunnel(config: ClientConfig) -> Result<()> {
    info!("ntnl v{}", env!("CARGO_PKG_VERSION"));
    info!("Local service: {}", config.local_address);
    info!("Relay: {}", config.server_url);

    let manager = ConnectionManager::new(config)?;
    let printer = tokio::spawn(print_public_url(manager.subscribe()));

    let result = tokio::select! {
        result = manager.run() => result.context("Tunnel stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    };

    printer.abort();
    result
}

async fn print_public_url(mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        if let ConnectionState::Registered { url } = current {
            println!("Forwarding {} -> local service", url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_args() {
        let args = Args::parse_from(["ntnl", "http", "3000", "-s", "demo", "-u", "ws://localhost:8000"]);
        match args.command {
            Command::Http {
                port,
                subdomain,
                url,
            } => {
                assert_eq!(port, 3000);
                assert_eq!(subdomain.as_deref(), Some("demo"));
                assert_eq!(url.as_deref(), Some("ws://localhost:8000"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_port_zero_is_rejected() {
        assert!(Args::try_parse_from(["ntnl", "http", "0"]).is_err());
        assert!(Args::try_parse_from(["ntnl", "http", "70000"]).is_err());
    }

    #[test]
    fn test_serve_defaults() {
        let args = Args::parse_from(["ntnl", "serve", "--verbose"]);
        assert!(args.verbose);
        match args.command {
            Command::Serve { dir, port, .. } => {
                assert_eq!(dir, PathBuf::from("."));
                assert_eq!(port, 8000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
