//! Fixed-window rate limiting
//!
//! `RateLimiter` counts requests per key in a window that starts with the
//! first request and resets once it has elapsed. `TunnelRateLimiter` bundles
//! the limits that apply to tunnel clients: subdomain creation per IP,
//! relayed requests per subdomain, and live tunnels per IP.

use crate::config::{RelayConfig, WindowLimit};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a single `RateLimiter::check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window resets
    pub reset_after: Duration,
    /// Whole seconds to wait, set only when the request was refused
    pub retry_after_secs: Option<u64>,
}

/// Snapshot for the stats endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub active_entries: usize,
    pub window_ms: u128,
    pub max_requests: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            window: limit.window,
            max_requests: limit.max_requests,
            entries: DashMap::new(),
        }
    }

    /// Count one request against `key`; refused requests do not consume quota
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_at: now + self.window,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        let reset_after = entry.reset_at.saturating_duration_since(now);
        let allowed = entry.count < self.max_requests;
        if allowed {
            entry.count += 1;
        }

        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after,
            retry_after_secs: (!allowed).then(|| ceil_secs(reset_after)),
        }
    }

    /// What `check` would decide for `key`, without counting anything
    pub fn peek(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let (count, reset_at) = match self.entries.get(key) {
            Some(entry) if now < entry.reset_at => (entry.count, entry.reset_at),
            _ => (0, now + self.window),
        };

        let reset_after = reset_at.saturating_duration_since(now);
        let allowed = count < self.max_requests;
        RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            reset_after,
            retry_after_secs: (!allowed).then(|| ceil_secs(reset_after)),
        }
    }

    /// Drop entries whose window has already elapsed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            active_entries: self.entries.len(),
            window_ms: self.window.as_millis(),
            max_requests: self.max_requests,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelLimitStats {
    pub subdomain_creation: RateLimiterStats,
    pub tunnel_requests: RateLimiterStats,
    pub active_concurrent_connections: usize,
    pub total_concurrent_tunnels: usize,
}

/// Limits applied to tunnel clients rather than to public callers
pub struct TunnelRateLimiter {
    subdomain_creation: RateLimiter,
    client_requests: RateLimiter,
    max_tunnels_per_ip: usize,
    concurrent: DashMap<IpAddr, HashSet<String>>,
}

impl TunnelRateLimiter {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            subdomain_creation: RateLimiter::new(config.subdomain_creation_limit),
            client_requests: RateLimiter::new(config.tunnel_limit),
            max_tunnels_per_ip: config.max_tunnels_per_ip,
            concurrent: DashMap::new(),
        }
    }

    /// Whether `ip` may create another subdomain; consumes nothing
    pub fn peek_subdomain_creation(&self, ip: IpAddr) -> RateDecision {
        self.subdomain_creation.peek(&ip.to_string())
    }

    /// Count a subdomain created by `ip`
    pub fn check_subdomain_creation(&self, ip: IpAddr) -> RateDecision {
        self.subdomain_creation.check(&ip.to_string())
    }

    pub fn check_client_request(&self, subdomain: &str) -> RateDecision {
        self.client_requests.check(subdomain)
    }

    /// Whether `ip` may open another tunnel
    pub fn check_concurrent_tunnels(&self, ip: IpAddr) -> bool {
        self.concurrent
            .get(&ip)
            .is_none_or(|tunnels| tunnels.len() < self.max_tunnels_per_ip)
    }

    pub fn add_tunnel(&self, ip: IpAddr, subdomain: &str) {
        self.concurrent
            .entry(ip)
            .or_default()
            .insert(subdomain.to_string());
    }

    pub fn remove_tunnel(&self, ip: IpAddr, subdomain: &str) {
        let now_empty = match self.concurrent.get_mut(&ip) {
            Some(mut tunnels) => {
                tunnels.remove(subdomain);
                tunnels.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.concurrent.remove_if(&ip, |_, tunnels| tunnels.is_empty());
        }
    }

    pub fn tunnels_for(&self, ip: IpAddr) -> usize {
        self.concurrent.get(&ip).map_or(0, |tunnels| tunnels.len())
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.subdomain_creation.purge_expired() + self.client_requests.purge_expired();
        self.concurrent.retain(|_, tunnels| !tunnels.is_empty());
        if purged > 0 {
            debug!("Purged {} expired tunnel rate limit entries", purged);
        }
        purged
    }

    pub fn stats(&self) -> TunnelLimitStats {
        TunnelLimitStats {
            subdomain_creation: self.subdomain_creation.stats(),
            tunnel_requests: self.client_requests.stats(),
            active_concurrent_connections: self.concurrent.len(),
            total_concurrent_tunnels: self.concurrent.iter().map(|e| e.value().len()).sum(),
        }
    }
}
