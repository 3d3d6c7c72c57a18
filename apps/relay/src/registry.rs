//! Tunnel registry
//!
//! Owns every live control connection and the subdomain each one claimed.
//! A subdomain maps to at most one connection, and a connection claims at
//! most one subdomain.

use crate::correlation::PendingTable;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ntnl_common::constants::SUBDOMAIN_GENERATION_ATTEMPTS;
use ntnl_common::validation::validate_subdomain;
use ntnl_common::{Result, ServerMessage, TunnelError, generate_subdomain};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identity of a control connection, unique for the lifetime of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One tunnel client's control channel
#[derive(Debug)]
pub struct ControlConnection {
    id: ConnectionId,
    client_ip: IpAddr,
    connected_at: Instant,
    subdomain: OnceLock<String>,
    outbound: mpsc::Sender<ServerMessage>,
    pending: Arc<PendingTable>,
}

impl ControlConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// The claimed subdomain, once registration succeeded
    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.get().map(String::as_str)
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    pub fn is_open(&self) -> bool {
        !self.pending.is_closed() && !self.outbound.is_closed()
    }

    /// Queue a message for the connection's writer task
    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        if self.pending.is_closed() {
            return Err(TunnelError::ConnectionError(format!(
                "{} is closed",
                self.id
            )));
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| TunnelError::ConnectionError(format!("{} writer has stopped", self.id)))
    }

    /// Resolve every pending request as failed; returns how many were pending
    fn close(&self) -> usize {
        self.pending.close()
    }
}

/// Registry of live control connections and their subdomains
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    connections: DashMap<ConnectionId, Arc<ControlConnection>>,
    subdomains: DashMap<String, ConnectionId>,
    next_id: AtomicU64,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted control connection
    pub fn attach(
        &self,
        client_ip: IpAddr,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Arc<ControlConnection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let connection = Arc::new(ControlConnection {
            id,
            client_ip,
            connected_at: Instant::now(),
            subdomain: OnceLock::new(),
            outbound,
            pending: Arc::new(PendingTable::new()),
        });
        self.connections.insert(id, Arc::clone(&connection));
        debug!("Attached control connection {} from {}", id, client_ip);
        connection
    }

    /// Claim a subdomain for `connection`
    ///
    /// With `desired` the name is validated and must be free. Without it a
    /// fresh name is generated, retrying on collision.
    pub fn register(&self, connection: &ControlConnection, desired: Option<&str>) -> Result<String> {
        if connection.subdomain().is_some() {
            return Err(TunnelError::RegistrationRejected(
                "Already registered".to_string(),
            ));
        }
        if !self.connections.contains_key(&connection.id) || connection.pending.is_closed() {
            return Err(TunnelError::ConnectionError(format!(
                "{} is closed",
                connection.id
            )));
        }

        let subdomain = match desired {
            Some(name) => {
                let name = validate_subdomain(name)
                    .map_err(|_| TunnelError::InvalidSubdomain(name.to_string()))?;
                self.claim(&name, connection.id)?;
                name
            }
            None => self.claim_generated(connection.id)?,
        };

        if connection.subdomain.set(subdomain.clone()).is_err() {
            self.subdomains
                .remove_if(&subdomain, |_, owner| *owner == connection.id);
            return Err(TunnelError::RegistrationRejected(
                "Already registered".to_string(),
            ));
        }

        info!(
            "Registered subdomain {} for {} ({})",
            subdomain, connection.id, connection.client_ip
        );
        Ok(subdomain)
    }

    fn claim(&self, subdomain: &str, owner: ConnectionId) -> Result<()> {
        match self.subdomains.entry(subdomain.to_string()) {
            Entry::Occupied(_) => Err(TunnelError::SubdomainInUse(subdomain.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(owner);
                Ok(())
            }
        }
    }

    fn claim_generated(&self, owner: ConnectionId) -> Result<String> {
        for _ in 0..SUBDOMAIN_GENERATION_ATTEMPTS {
            let candidate = generate_subdomain();
            if self.claim(&candidate, owner).is_ok() {
                return Ok(candidate);
            }
        }
        Err(TunnelError::InternalError(
            "could not generate a free subdomain".to_string(),
        ))
    }

    /// The live connection serving `subdomain`, if any
    pub fn lookup(&self, subdomain: &str) -> Option<Arc<ControlConnection>> {
        let owner = *self.subdomains.get(subdomain)?;
        self.connections
            .get(&owner)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Forget a connection, free its subdomain and fail its pending requests
    ///
    /// Calling this more than once for the same connection is a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<ControlConnection>> {
        let (_, connection) = self.connections.remove(&id)?;

        if let Some(subdomain) = connection.subdomain() {
            self.subdomains.remove_if(subdomain, |_, owner| *owner == id);
            info!("Released subdomain {} held by {}", subdomain, id);
        }

        let failed = connection.close();
        if failed > 0 {
            info!("Failed {} pending requests on closed {}", failed, id);
        }
        Some(connection)
    }

    /// Number of connections holding a subdomain
    pub fn active_tunnels(&self) -> usize {
        self.subdomains.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Requests still waiting for a response, across all connections
    pub fn pending_requests(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().pending.len())
            .sum()
    }
}
