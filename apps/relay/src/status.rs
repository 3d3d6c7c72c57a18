//! Bare-domain routes: control connection upgrade, landing page, health and stats

use crate::AppState;
use crate::control;
use crate::correlation::CorrelationStats;
use crate::error_handling::error_response;
use crate::ingress::{client_ip, is_websocket_upgrade};
use crate::rate_limit::{RateLimiterStats, TunnelLimitStats};
use axum::Json;
use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_tunnels: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitReport {
    pub ip: RateLimiterStats,
    #[serde(flatten)]
    pub tunnels: TunnelLimitStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub active_tunnels: usize,
    pub connections: usize,
    pub uptime_secs: u64,
    pub pending_requests: usize,
    pub requests: CorrelationStats,
    pub rate_limits: RateLimitReport,
}

/// `/`: control connection upgrade, or the landing page
pub async fn root(State(state): State<AppState>, request: Request) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return landing(&state).into_response();
    }

    let ip = client_ip(&request);
    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => {
            debug!("Upgrading control connection from {}", ip);
            ws.on_upgrade(move |socket| control::handle_socket(socket, state, ip))
        }
        Err(rejection) => rejection.into_response(),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_tunnels: state.registry.active_tunnels(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        active_tunnels: state.registry.active_tunnels(),
        connections: state.registry.connection_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pending_requests: state.registry.pending_requests(),
        requests: state.correlator.stats(),
        rate_limits: RateLimitReport {
            ip: state.ip_limiter.stats(),
            tunnels: state.tunnel_limits.stats(),
        },
    })
}

pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

fn landing(state: &AppState) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>ntnl</title></head>
<body>
<h1>ntnl</h1>
<p>Expose a local HTTP server at <code>{scheme}://&lt;name&gt;.{domain}</code>.</p>
<pre>ntnl http 3000</pre>
<p>{tunnels} active tunnel(s), up {uptime}s.</p>
</body>
</html>
"#,
        scheme = state.config.scheme,
        domain = state.config.domain,
        tunnels = state.registry.active_tunnels(),
        uptime = state.started_at.elapsed().as_secs(),
    ))
}
