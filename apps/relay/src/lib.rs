//! ntnl relay
//!
//! A single HTTP listener that serves two kinds of traffic:
//! - WebSocket control connections from tunnel clients (upgrade on `/`)
//! - Public HTTP requests addressed to `{subdomain}.{domain}`, relayed over the
//!   matching control connection and answered with the client's response
//!
//! Requests to the bare domain reach the status endpoints instead.

use crate::config::RelayConfig;
use crate::correlation::Correlator;
use crate::rate_limit::{RateLimiter, TunnelRateLimiter};
use crate::registry::TunnelRegistry;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use ntnl_common::constants::RATE_LIMIT_SWEEP_INTERVAL_SECS;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub mod config;
pub mod control;
pub mod correlation;
pub mod error_handling;
pub mod ingress;
pub mod rate_limit;
pub mod registry;
pub mod status;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<TunnelRegistry>,
    pub correlator: Arc<Correlator>,
    pub ip_limiter: Arc<RateLimiter>,
    pub tunnel_limits: Arc<TunnelRateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            correlator: Arc::new(Correlator::new(config.request_timeout)),
            ip_limiter: Arc::new(RateLimiter::new(config.ip_limit)),
            tunnel_limits: Arc::new(TunnelRateLimiter::new(&config)),
            started_at: Instant::now(),
            config: Arc::new(config),
        }
    }
}

/// The relay server
pub struct Relay {
    state: AppState,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router serving control connections, tunnel ingress and status endpoints
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        Router::new()
            .route("/", get(status::root))
            .route("/health", get(status::health))
            .route("/api/stats", get(status::stats))
            .fallback(status::not_found)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                ingress::route_by_host,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Periodically drop expired rate-limit entries
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(Duration::from_secs(RATE_LIMIT_SWEEP_INTERVAL_SECS));
            sweep.tick().await;
            loop {
                sweep.tick().await;
                let purged = state.ip_limiter.purge_expired() + state.tunnel_limits.purge_expired();
                debug!("Rate limit sweep removed {} entries", purged);
            }
        })
    }

    /// Serve until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let maintenance = self.spawn_maintenance();
        let app = self.router();

        info!(
            "Relay listening on {} for *.{}",
            listener.local_addr()?,
            self.state.config.domain
        );

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        maintenance.abort();
        info!("Relay stopped");
        result
    }
}
