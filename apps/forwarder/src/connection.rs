//! Connection manager
//!
//! Opens the control connection, registers, and then serves relayed requests
//! until the connection drops. Drops are retried with backoff through the
//! `Reconnector`; a registration refusal or an exhausted retry budget ends
//! `run` with an error.

use crate::config::ClientConfig;
use crate::forwarder::Forwarder;
use crate::reconnect::{ConnectionState, Reconnector};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ntnl_common::{ClientMessage, Result, ServerMessage, TunnelError, TunnelRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection manager handles WebSocket lifecycle and reconnection
pub struct ConnectionManager {
    config: ClientConfig,
    forwarder: Arc<Forwarder>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let forwarder = Forwarder::new(config.local_address.clone(), config.request_timeout)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            config,
            forwarder: Arc::new(forwarder),
            state_tx,
        })
    }

    /// Observe state changes (e.g. to print the public URL once registered)
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn publish(&self, state: &ConnectionState) {
        self.state_tx.send_replace(state.clone());
    }

    /// Main run loop with automatic reconnection
    ///
    /// Only returns on a fatal condition: the relay refused registration, or
    /// reconnection gave up.
    pub async fn run(&self) -> Result<()> {
        let mut reconnector = Reconnector::new(self.config.reconnect);

        loop {
            self.publish(reconnector.on_connecting());

            match self.establish_connection().await {
                Ok((ws_stream, public_url)) => {
                    info!("Tunnel established: {}", public_url);
                    self.publish(reconnector.on_registered(public_url));
                    self.handle_connection(ws_stream).await;
                }
                Err(e @ TunnelError::RegistrationRejected(_)) => {
                    error!("Registration failed: {}", e);
                    self.publish(reconnector.on_closed());
                    return Err(e);
                }
                Err(e) => {
                    error!("Failed to connect: {}", e);
                }
            }

            match reconnector.on_disconnected() {
                Ok(delay) => {
                    self.publish(reconnector.state());
                    info!(
                        "Reconnecting in {:?} (attempt {}/{})",
                        delay,
                        reconnector.attempts(),
                        self.config.reconnect.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.publish(reconnector.state());
                    error!("Giving up: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Open the WebSocket, send `register`, and wait for `registered`
    async fn establish_connection(&self) -> Result<(WebSocket, String)> {
        debug!("Connecting to {}", self.config.server_url);

        let (mut ws_stream, _) = connect_async(self.config.server_url.as_str())
            .await
            .map_err(|e| TunnelError::ConnectionError(e.to_string()))?;

        let register = ClientMessage::Register {
            port: self.config.port,
            subdomain: self.config.subdomain.clone(),
        };
        ws_stream
            .send(WsMessage::Text(register.to_json()?.into()))
            .await
            .map_err(|e| TunnelError::WebSocketError(format!("Failed to send register: {}", e)))?;

        debug!("Sent register, waiting for registered");

        let handshake = tokio::time::timeout(self.config.registration_timeout, async {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => match ServerMessage::from_json(text.as_str()) {
                        Ok(ServerMessage::Registered { url }) => return Ok(url),
                        Ok(ServerMessage::Error { message }) => {
                            return Err(TunnelError::RegistrationRejected(message));
                        }
                        Ok(other) => debug!("Ignoring {:?} before registration", other),
                        Err(e) => warn!("Unparseable message during handshake: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => {
                        return Err(TunnelError::ConnectionError(
                            "Server closed connection during handshake".to_string(),
                        ));
                    }
                    Err(e) => return Err(TunnelError::WebSocketError(e.to_string())),
                    _ => {}
                }
            }
            Err(TunnelError::ConnectionError(
                "Connection closed before handshake".to_string(),
            ))
        });

        let public_url = handshake.await.map_err(|_| {
            TunnelError::ConnectionError("Registration handshake timeout".to_string())
        })??;

        Ok((ws_stream, public_url))
    }

    /// Handle active WebSocket connection with split read/write tasks
    async fn handle_connection(&self, ws_stream: WebSocket) {
        let (write, read) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(100);

        let mut write_handle = tokio::spawn(write_task(write, outgoing_rx));
        let mut read_handle = tokio::spawn(read_task(
            read,
            outgoing_tx.clone(),
            Arc::clone(&self.forwarder),
        ));
        let mut heartbeat_handle = tokio::spawn(heartbeat_task(
            outgoing_tx,
            self.config.heartbeat_interval,
        ));

        // Any task ending means the connection is gone
        tokio::select! {
            result = &mut write_handle => debug!("Write task ended: {:?}", result),
            result = &mut read_handle => debug!("Read task ended: {:?}", result),
            result = &mut heartbeat_handle => debug!("Heartbeat task ended: {:?}", result),
        }

        write_handle.abort();
        read_handle.abort();
        heartbeat_handle.abort();
        warn!("Disconnected from relay");
    }
}

async fn write_task(
    mut write: SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) {
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to send message: {}", e);
            break;
        }
    }
    debug!("Write task exiting");
}

async fn read_task(
    mut read: SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<WsMessage>,
    forwarder: Arc<Forwarder>,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                handle_server_message(text.as_str(), &outgoing_tx, &forwarder);
            }
            Ok(WsMessage::Ping(data)) => {
                if outgoing_tx.send(WsMessage::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                info!("Server closed connection");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            Ok(_) => {}
        }
    }
    debug!("Read task exiting");
}

/// Dispatch one relay envelope; tunnel requests run concurrently
fn handle_server_message(
    text: &str,
    outgoing_tx: &mpsc::Sender<WsMessage>,
    forwarder: &Arc<Forwarder>,
) {
    match ServerMessage::from_json(text) {
        Ok(ServerMessage::Tunnel { data }) => {
            debug!("Received request {}: {} {}", data.id, data.method, data.path);
            tokio::spawn(respond(
                data,
                Arc::clone(forwarder),
                outgoing_tx.clone(),
            ));
        }
        Ok(ServerMessage::Pong) => debug!("Received pong"),
        Ok(ServerMessage::Error { message }) => warn!("Relay reported: {}", message),
        Ok(ServerMessage::Registered { url }) => warn!("Unexpected registered message for {}", url),
        Err(e) => warn!("Ignoring malformed message: {}", e),
    }
}

async fn respond(request: TunnelRequest, forwarder: Arc<Forwarder>, outgoing_tx: mpsc::Sender<WsMessage>) {
    let response = forwarder.forward(request).await;
    let id = response.id.clone();

    match (ClientMessage::Tunnel { data: response }).to_json() {
        Ok(json) => {
            if outgoing_tx.send(WsMessage::Text(json.into())).await.is_err() {
                warn!("Connection closed before response {} could be sent", id);
            }
        }
        Err(e) => error!("Failed to serialize response {}: {}", id, e),
    }
}

async fn heartbeat_task(outgoing_tx: mpsc::Sender<WsMessage>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let ping = match ClientMessage::Ping.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize heartbeat: {}", e);
                break;
            }
        };
        if outgoing_tx.send(WsMessage::Text(ping.into())).await.is_err() {
            break;
        }
        debug!("Sent heartbeat");
    }
    debug!("Heartbeat task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::ReconnectConfig;

    #[test]
    fn test_new_manager_starts_disconnected() {
        let config = ClientConfig::new("ws://127.0.0.1:1", 3000, None);
        let manager = ConnectionManager::new(config).unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_relay_gives_up() {
        let mut config = ClientConfig::new("ws://127.0.0.1:1", 3000, None);
        config.reconnect = ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        };
        let manager = ConnectionManager::new(config).unwrap();

        let err = manager.run().await.unwrap_err();
        assert!(matches!(
            err,
            TunnelError::MaxReconnectAttemptsExceeded { attempts: 2 }
        ));
        assert_eq!(manager.state(), ConnectionState::GivenUp);
    }

    #[tokio::test]
    async fn test_tunnel_request_is_answered_with_502_when_origin_is_down() {
        let forwarder = Arc::new(Forwarder::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap());
        let (tx, mut rx) = mpsc::channel(4);

        let request = TunnelRequest::new("abc".to_string(), "GET".to_string(), "/".to_string());
        let envelope = ServerMessage::Tunnel { data: request }.to_json().unwrap();
        handle_server_message(&envelope, &tx, &forwarder);

        let Some(WsMessage::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        match ClientMessage::from_json(text.as_str()).unwrap() {
            ClientMessage::Tunnel { data } => {
                assert_eq!(data.id, "abc");
                assert_eq!(data.status_code, 502);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
