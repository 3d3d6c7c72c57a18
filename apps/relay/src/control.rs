//! Control connections
//!
//! Each tunnel client holds one WebSocket. A writer task owns the sending
//! half and drains the connection's outbound queue; the reading half is
//! processed here, one envelope at a time.

use crate::AppState;
use crate::correlation::Resolution;
use crate::registry::ControlConnection;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use ntnl_common::constants::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};
use ntnl_common::{ClientMessage, Result, ServerMessage, TunnelError};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const OUTBOUND_BUFFER: usize = 100;

/// When the tunnel client was last heard from
///
/// Any inbound frame counts, including pongs to the writer's pings.
#[derive(Debug)]
pub struct Liveness {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame
    pub fn idle(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last_seen)
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.idle() > timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one control connection until the client goes away
///
/// The connection is dropped when the client stays silent for longer than
/// `HEARTBEAT_TIMEOUT_SECS`, even if the socket itself never reports an error.
pub async fn handle_socket(socket: WebSocket, state: AppState, client_ip: IpAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let connection = state.registry.attach(client_ip, tx);
    let id = connection.id();
    info!("Control connection {} opened from {}", id, client_ip);

    let liveness = Arc::new(Liveness::new());
    let writer_liveness = Arc::clone(&liveness);
    let mut writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        let timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize message for {}: {}", id, e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        debug!("Write to {} failed: {}", id, e);
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if writer_liveness.is_stale(timeout) {
                        warn!(
                            "No traffic from {} for {:?}, dropping connection",
                            id,
                            writer_liveness.idle()
                        );
                        break;
                    }
                    if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        debug!("Heartbeat to {} failed", id);
                        break;
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut writer => {
                debug!("Writer for {} stopped", id);
                break;
            }
        };
        let Some(frame) = frame else { break };
        liveness.touch();

        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Non UTF-8 binary frame from {}", id);
                    reply(&connection, ServerMessage::error("Invalid message format")).await;
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                debug!("{} sent close", id);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!("Read from {} failed: {}", id, e);
                break;
            }
        };

        handle_client_message(&state, &connection, &text).await;
    }

    writer.abort();
    close_connection(&state, &connection);
    info!("Control connection {} closed", id);
}

/// Remove the connection from the registry and release its tunnel quota
pub fn close_connection(state: &AppState, connection: &ControlConnection) {
    if state.registry.unregister(connection.id()).is_some()
        && let Some(subdomain) = connection.subdomain()
    {
        state
            .tunnel_limits
            .remove_tunnel(connection.client_ip(), subdomain);
    }
}

/// Process one envelope received from a tunnel client
pub async fn handle_client_message(state: &AppState, connection: &ControlConnection, text: &str) {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Malformed message from {}: {}", connection.id(), e);
            reply(connection, ServerMessage::error("Invalid message format")).await;
            return;
        }
    };

    match message {
        ClientMessage::Register { port, subdomain } => {
            let response = match admit_registration(state, connection, subdomain.as_deref()) {
                Ok(name) => {
                    info!(
                        "Tunnel {} -> {} local port {}",
                        name,
                        connection.id(),
                        port
                    );
                    ServerMessage::Registered {
                        url: state.config.public_url(&name),
                    }
                }
                Err(e) => {
                    warn!("Registration from {} rejected: {}", connection.id(), e);
                    ServerMessage::error(rejection_reason(&e))
                }
            };
            reply(connection, response).await;
        }
        ClientMessage::Tunnel { data } => {
            let request_id = data.id.clone();
            if !connection
                .pending()
                .resolve(&request_id, Resolution::Response(data))
            {
                warn!(
                    "Ignoring response for unknown or already resolved request {} on {}",
                    request_id,
                    connection.id()
                );
            }
        }
        ClientMessage::Ping => reply(connection, ServerMessage::Pong).await,
    }
}

/// Apply per-IP admission limits, then claim a subdomain
pub fn admit_registration(
    state: &AppState,
    connection: &ControlConnection,
    desired: Option<&str>,
) -> Result<String> {
    if connection.subdomain().is_some() {
        return Err(TunnelError::RegistrationRejected(
            "Already registered".to_string(),
        ));
    }

    let ip = connection.client_ip();
    if !state.tunnel_limits.check_concurrent_tunnels(ip) {
        return Err(TunnelError::RegistrationRejected(
            "Too many tunnels from this address".to_string(),
        ));
    }

    let decision = state.tunnel_limits.peek_subdomain_creation(ip);
    if !decision.allowed {
        return Err(TunnelError::RateLimitExceeded {
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
        });
    }

    // Only a successful claim counts as a creation
    let subdomain = state.registry.register(connection, desired)?;
    state.tunnel_limits.check_subdomain_creation(ip);
    state.tunnel_limits.add_tunnel(ip, &subdomain);
    Ok(subdomain)
}

/// Reason string sent to the client in an `error` envelope
pub fn rejection_reason(e: &TunnelError) -> String {
    match e {
        TunnelError::SubdomainInUse(_) => "Subdomain already in use".to_string(),
        TunnelError::InvalidSubdomain(_) => "Invalid subdomain".to_string(),
        TunnelError::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
        TunnelError::RegistrationRejected(reason) => reason.clone(),
        _ => "Registration failed".to_string(),
    }
}

async fn reply(connection: &ControlConnection, message: ServerMessage) {
    if let Err(e) = connection.send(message).await {
        debug!("Could not reply on {}: {}", connection.id(), e);
    }
}
