//! Relay configuration
//!
//! `RelayArgs` is the command-line/environment surface; `RelayConfig` is the
//! plain value the rest of the relay consumes, so tests can build one directly.

use clap::Parser;
use ntnl_common::constants::{
    IP_RATE_MAX_REQUESTS, IP_RATE_WINDOW_SECS, MAX_BODY_SIZE_BYTES,
    MAX_CONCURRENT_TUNNELS_PER_IP, REQUEST_TIMEOUT_SECS, SUBDOMAIN_CREATION_MAX,
    SUBDOMAIN_CREATION_WINDOW_SECS, TUNNEL_RATE_MAX_REQUESTS, TUNNEL_RATE_WINDOW_SECS,
};
use std::time::Duration;

/// CLI arguments for the relay server
#[derive(Parser, Debug)]
#[command(name = "ntnl-relay")]
#[command(about = "Public relay for ntnl tunnels", long_about = None)]
#[command(version)]
pub struct RelayArgs {
    /// Port to listen on for public HTTP and control connections
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Public domain; tunnels are served at {subdomain}.{domain}
    #[arg(short, long, env = "DOMAIN_NAME", default_value = "localhost:8000")]
    pub domain: String,

    /// Scheme used in the public URLs handed to clients
    #[arg(long, env = "PUBLIC_SCHEME", default_value = "http")]
    pub scheme: String,

    /// Seconds to wait for a tunnel client before answering 504
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Public requests allowed per client IP per window
    #[arg(long, default_value_t = IP_RATE_MAX_REQUESTS)]
    pub ip_rate_limit: u32,

    /// Length of the per-IP window in seconds
    #[arg(long, default_value_t = IP_RATE_WINDOW_SECS)]
    pub ip_rate_window_secs: u64,

    /// Relayed requests allowed per subdomain per window
    #[arg(long, default_value_t = TUNNEL_RATE_MAX_REQUESTS)]
    pub tunnel_rate_limit: u32,

    /// Length of the per-subdomain window in seconds
    #[arg(long, default_value_t = TUNNEL_RATE_WINDOW_SECS)]
    pub tunnel_rate_window_secs: u64,

    /// Live tunnels a single client IP may hold
    #[arg(long, default_value_t = MAX_CONCURRENT_TUNNELS_PER_IP)]
    pub max_tunnels_per_ip: usize,

    /// Subdomains a single client IP may register per hour
    #[arg(long, default_value_t = SUBDOMAIN_CREATION_MAX)]
    pub subdomain_creation_limit: u32,

    /// Largest public request body accepted, in bytes
    #[arg(long, default_value_t = MAX_BODY_SIZE_BYTES)]
    pub max_body_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// A sliding-window limit: at most `max_requests` per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub window: Duration,
    pub max_requests: u32,
}

impl WindowLimit {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

/// Configuration for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Public domain including port if not default (e.g. "localhost:8000")
    pub domain: String,

    /// Scheme for public tunnel URLs
    pub scheme: String,

    /// Hard ceiling for a relayed request
    pub request_timeout: Duration,

    /// Public requests per client IP
    pub ip_limit: WindowLimit,

    /// Relayed requests per subdomain
    pub tunnel_limit: WindowLimit,

    /// Subdomain registrations per client IP
    pub subdomain_creation_limit: WindowLimit,

    /// Live tunnels per client IP
    pub max_tunnels_per_ip: usize,

    /// Largest public request body accepted
    pub max_body_bytes: usize,
}

impl RelayConfig {
    pub fn from_args(args: &RelayArgs) -> Self {
        Self {
            domain: args.domain.to_ascii_lowercase(),
            scheme: args.scheme.clone(),
            request_timeout: Duration::from_secs(args.request_timeout),
            ip_limit: WindowLimit::new(
                Duration::from_secs(args.ip_rate_window_secs),
                args.ip_rate_limit,
            ),
            tunnel_limit: WindowLimit::new(
                Duration::from_secs(args.tunnel_rate_window_secs),
                args.tunnel_rate_limit,
            ),
            subdomain_creation_limit: WindowLimit::new(
                Duration::from_secs(SUBDOMAIN_CREATION_WINDOW_SECS),
                args.subdomain_creation_limit,
            ),
            max_tunnels_per_ip: args.max_tunnels_per_ip,
            max_body_bytes: args.max_body_bytes,
        }
    }

    /// Externally reachable URL for a subdomain
    pub fn public_url(&self, subdomain: &str) -> String {
        format!("{}://{}.{}", self.scheme, subdomain, self.domain)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            domain: "localhost:8000".to_string(),
            scheme: "http".to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            ip_limit: WindowLimit::new(
                Duration::from_secs(IP_RATE_WINDOW_SECS),
                IP_RATE_MAX_REQUESTS,
            ),
            tunnel_limit: WindowLimit::new(
                Duration::from_secs(TUNNEL_RATE_WINDOW_SECS),
                TUNNEL_RATE_MAX_REQUESTS,
            ),
            subdomain_creation_limit: WindowLimit::new(
                Duration::from_secs(SUBDOMAIN_CREATION_WINDOW_SECS),
                SUBDOMAIN_CREATION_MAX,
            ),
            max_tunnels_per_ip: MAX_CONCURRENT_TUNNELS_PER_IP,
            max_body_bytes: MAX_BODY_SIZE_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_default_args() {
        let args = RelayArgs::parse_from(["ntnl-relay"]);
        let config = RelayConfig::from_args(&args);

        assert_eq!(args.port, 8000);
        assert_eq!(config.domain, "localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.ip_limit.max_requests, 60);
        assert_eq!(config.tunnel_limit.max_requests, 120);
        assert_eq!(config.subdomain_creation_limit.window, Duration::from_secs(3600));
        assert_eq!(config.max_tunnels_per_ip, 3);
    }

    #[test]
    fn test_config_from_custom_args() {
        let args = RelayArgs::parse_from([
            "ntnl-relay",
            "--domain",
            "Tunnel.Example.com",
            "--scheme",
            "https",
            "--request-timeout",
            "30",
            "--ip-rate-limit",
            "10",
        ]);
        let config = RelayConfig::from_args(&args);

        assert_eq!(config.domain, "tunnel.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.ip_limit.max_requests, 10);
        assert_eq!(
            config.public_url("demo"),
            "https://demo.tunnel.example.com"
        );
    }

    #[test]
    fn test_public_url_keeps_port() {
        let config = RelayConfig::default();
        assert_eq!(config.public_url("fox-hawk-12"), "http://fox-hawk-12.localhost:8000");
    }
}
