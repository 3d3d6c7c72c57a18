/// Hard ceiling for a relayed request before the relay answers 504 (2 minutes)
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Heartbeat interval for the client `ping` envelope and relay WebSocket pings
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Silence after which the relay drops a control connection (two missed heartbeats)
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 2 * HEARTBEAT_INTERVAL_SECS;

/// Base delay for exponential backoff reconnection (1 second)
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff reconnection (30 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 30000;

/// Consecutive failed connections tolerated before the client gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How long the client waits for `registered` after the socket opens
pub const REGISTRATION_TIMEOUT_SECS: u64 = 10;

/// Default per-IP public request window (1 minute)
pub const IP_RATE_WINDOW_SECS: u64 = 60;

/// Default public requests allowed per IP per window
pub const IP_RATE_MAX_REQUESTS: u32 = 60;

/// Default per-subdomain request window (1 minute)
pub const TUNNEL_RATE_WINDOW_SECS: u64 = 60;

/// Default relayed requests allowed per subdomain per window
pub const TUNNEL_RATE_MAX_REQUESTS: u32 = 120;

/// Window for subdomain creation per IP (1 hour)
pub const SUBDOMAIN_CREATION_WINDOW_SECS: u64 = 3600;

/// Subdomains a single IP may register per creation window
pub const SUBDOMAIN_CREATION_MAX: u32 = 5;

/// Live tunnels a single IP may hold at once
pub const MAX_CONCURRENT_TUNNELS_PER_IP: usize = 3;

/// Generated subdomain candidates tried before registration fails
pub const SUBDOMAIN_GENERATION_ATTEMPTS: usize = 16;

/// Interval between sweeps of expired rate-limit entries (5 minutes)
pub const RATE_LIMIT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Maximum public request body accepted by the relay (10 MiB)
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Default relay endpoint used by the CLI when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "wss://tunnel.ntnl.io";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_values() {
        const _: () = assert!(HEARTBEAT_INTERVAL_SECS < REQUEST_TIMEOUT_SECS);
        const _: () = assert!(HEARTBEAT_TIMEOUT_SECS > HEARTBEAT_INTERVAL_SECS);
        const _: () = assert!(RECONNECT_BASE_DELAY_MS < RECONNECT_MAX_DELAY_MS);
        const _: () = assert!(MAX_RECONNECT_ATTEMPTS > 0);
        const _: () = assert!(IP_RATE_MAX_REQUESTS > 0);
        const _: () = assert!(TUNNEL_RATE_MAX_REQUESTS > 0);

        assert_eq!(REQUEST_TIMEOUT_SECS, 120);
        assert_eq!(MAX_BODY_SIZE_BYTES, 10 * 1024 * 1024);
    }
}
