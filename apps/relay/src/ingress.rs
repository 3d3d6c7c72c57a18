//! Public ingress
//!
//! Requests whose host is `{subdomain}.{domain}` are turned into a
//! `TunnelRequest`, relayed over the owning control connection, and answered
//! with the client's response. Every other request continues to the status
//! routes. The per-IP rate limit applies to both, except `/health`.

use crate::AppState;
use crate::error_handling::{
    apply_rate_limit_headers, error_response, rate_limited_response, tunnel_error_response,
};
use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::Response;
use ntnl_common::utils::is_response_framing;
use ntnl_common::{
    TunnelError, TunnelRequest, TunnelResponse, generate_request_id, headers_to_map,
    map_to_headers, strip_hop_by_hop,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, warn};

/// Middleware that sends subdomain traffic to the tunnel and the rest to the router
pub async fn route_by_host(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let subdomain = request_host(request.headers(), request.uri())
        .and_then(|host| extract_subdomain(&host, &state.config.domain));

    let exempt = subdomain.is_none() && request.uri().path() == "/health";
    let decision = if exempt {
        None
    } else {
        let ip = client_ip(&request);
        let decision = state.ip_limiter.check(&ip.to_string());
        if !decision.allowed {
            warn!("Rate limit exceeded for {}", ip);
            return rate_limited_response(
                &decision,
                "Too many requests from this IP, please try again later.",
            );
        }
        Some(decision)
    };

    let mut response = match subdomain {
        Some(subdomain) => forward(&state, &subdomain, request).await,
        None => next.run(request).await,
    };

    if let Some(decision) = decision {
        apply_rate_limit_headers(&mut response, &decision);
    }
    response
}

/// Relay one public request through the tunnel serving `subdomain`
pub async fn forward(state: &AppState, subdomain: &str, request: Request) -> Response {
    let Some(connection) = state.registry.lookup(subdomain) else {
        debug!("No tunnel for subdomain {}", subdomain);
        return tunnel_error_response(&TunnelError::TunnelNotFound(subdomain.to_string()));
    };

    let decision = state.tunnel_limits.check_client_request(subdomain);
    if !decision.allowed {
        warn!("Tunnel request rate exceeded for {}", subdomain);
        return rate_limited_response(
            &decision,
            "Too many requests to this tunnel, please try again later.",
        );
    }

    let tunnel_request = match build_tunnel_request(request, state.config.max_body_bytes).await {
        Ok(tunnel_request) => tunnel_request,
        Err(response) => return response,
    };

    debug!(
        "Relaying {} {} to {} as {}",
        tunnel_request.method,
        tunnel_request.path,
        subdomain,
        tunnel_request.id
    );

    match state.correlator.dispatch(&connection, tunnel_request).await {
        Ok(tunnel_response) => build_response(tunnel_response),
        Err(e) => tunnel_error_response(&e),
    }
}

/// Read the public request into its wire form
///
/// Hop-by-hop headers are dropped and the body is limited to `max_body_bytes`.
pub async fn build_tunnel_request(
    request: Request,
    max_body_bytes: usize,
) -> Result<TunnelRequest, Response> {
    let declared_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > max_body_bytes) {
        return Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
    }

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, max_body_bytes).await.map_err(|e| {
        warn!("Failed to read request body: {}", e);
        error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    })?;

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let mut tunnel_request =
        TunnelRequest::new(generate_request_id(), parts.method.to_string(), path);
    tunnel_request.headers = strip_hop_by_hop(headers_to_map(&parts.headers));
    tunnel_request.body = (!body.is_empty()).then(|| body.to_vec());

    Ok(tunnel_request)
}

/// Turn the client's answer into the public response
///
/// Framing headers of the origin hop are dropped; the relay frames the body itself.
pub fn build_response(mut tunnel_response: TunnelResponse) -> Response {
    let status = StatusCode::from_u16(tunnel_response.status_code).unwrap_or_else(|_| {
        warn!(
            "Invalid status {} in response {}",
            tunnel_response.status_code, tunnel_response.id
        );
        StatusCode::BAD_GATEWAY
    });

    tunnel_response
        .headers
        .retain(|name, _| !is_response_framing(name));

    let mut response = Response::new(Body::from(tunnel_response.body.unwrap_or_default()));
    *response.status_mut() = status;
    *response.headers_mut() = map_to_headers(&tunnel_response.headers);
    response
}

/// Host the request was addressed to, preferring a forwarded host
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .or_else(|| uri.host().map(|h| h.to_ascii_lowercase()))
}

/// Leftmost label of `host` when it lies under `domain`; ports are ignored
///
/// # Examples
///
/// ```
/// use ntnl_relay::ingress::extract_subdomain;
///
/// assert_eq!(extract_subdomain("demo.localhost:8000", "localhost:8000").as_deref(), Some("demo"));
/// assert_eq!(extract_subdomain("localhost:8000", "localhost:8000"), None);
/// assert_eq!(extract_subdomain("demo.other.com", "example.com"), None);
/// ```
pub fn extract_subdomain(host: &str, domain: &str) -> Option<String> {
    let host = strip_port(host);
    let domain = strip_port(domain);

    let prefix = host.strip_suffix(domain)?.strip_suffix('.')?;
    let label = prefix.split('.').next()?;
    (!label.is_empty()).then(|| label.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map_or(host, |(addr, _)| &host[..addr.len() + 1]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Client address for rate limiting
pub fn client_ip(request: &Request) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    resolve_client_ip(request.headers(), peer)
}

/// Proxy headers first (`cf-connecting-ip`, `x-real-ip`, first `x-forwarded-for`),
/// then the socket peer
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    from_header("cf-connecting-ip")
        .or_else(|| from_header("x-real-ip"))
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Whether the request asks to upgrade to a WebSocket
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}
