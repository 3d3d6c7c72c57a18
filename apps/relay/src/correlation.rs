//! Request/response correlation
//!
//! Every relayed request gets a `PendingRequest` in the owning control
//! connection's `PendingTable`. Exactly one of three events resolves it: the
//! client's response, the relay timeout, or the connection closing. Resolution
//! removes the entry from the table, and `PendingRequest::resolve` consumes
//! the entry, so a second resolution has nothing left to act on.

use crate::registry::ControlConnection;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ntnl_common::{Result, ServerMessage, TunnelError, TunnelRequest, TunnelResponse};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a pending request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Response(TunnelResponse),
    TimedOut,
    ConnectionClosed,
}

impl Resolution {
    /// The response the public caller receives
    pub fn into_response(self, id: &str) -> TunnelResponse {
        match self {
            Resolution::Response(response) => response,
            Resolution::TimedOut => TunnelResponse::gateway_timeout(id.to_string()),
            Resolution::ConnectionClosed => TunnelResponse::bad_gateway(id.to_string()),
        }
    }
}

/// A request awaiting its response; dropping out of the table means resolved
#[derive(Debug)]
pub struct PendingRequest {
    created_at: Instant,
    responder: oneshot::Sender<Resolution>,
}

impl PendingRequest {
    /// Deliver the resolution; false when the waiting caller is already gone
    fn resolve(self, resolution: Resolution) -> bool {
        self.responder.send(resolution).is_ok()
    }
}

/// Pending requests of one control connection, keyed by request id
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingRequest>,
    closed: AtomicBool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending request; ids must be unique within the table
    pub fn insert(self: &Arc<Self>, id: &str) -> Result<ResponseHandle> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(TunnelError::InternalError(format!(
                    "duplicate request id {}",
                    id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    created_at: Instant::now(),
                    responder: tx,
                });
            }
        }

        let handle = ResponseHandle {
            id: id.to_string(),
            table: Arc::clone(self),
            rx,
        };

        // A close that ran before the insert would have missed this entry
        if self.closed.load(Ordering::Acquire) {
            self.resolve(id, Resolution::ConnectionClosed);
        }

        Ok(handle)
    }

    /// Resolve the entry for `id` if it is still pending
    ///
    /// Returns false when no such entry exists, which covers unknown ids and
    /// requests that were already resolved by another event.
    pub fn resolve(&self, id: &str, resolution: Resolution) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                let elapsed = pending.created_at.elapsed();
                if !pending.resolve(resolution) {
                    debug!("Request {} resolved after its caller left ({:?})", id, elapsed);
                }
                true
            }
            None => false,
        }
    }

    /// Resolve every pending entry as `ConnectionClosed`; later inserts resolve immediately
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.resolve(id, Resolution::ConnectionClosed))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn discard(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            debug!("Discarded pending request {} after its caller left", id);
        }
    }
}

/// Receiving side of a pending request
///
/// Dropping the handle before resolution removes the entry, so a public
/// caller that disconnects does not leave anything behind.
#[derive(Debug)]
pub struct ResponseHandle {
    id: String,
    table: Arc<PendingTable>,
    rx: oneshot::Receiver<Resolution>,
}

impl ResponseHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the resolution, resolving as `TimedOut` once `timeout` elapses
    pub async fn wait(self, timeout: Duration) -> Resolution {
        self.wait_until(Instant::now() + timeout).await
    }

    /// Wait for the resolution, resolving as `TimedOut` at `deadline`
    pub async fn wait_until(mut self, deadline: Instant) -> Resolution {
        tokio::select! {
            biased;
            resolution = &mut self.rx => resolution.unwrap_or(Resolution::ConnectionClosed),
            _ = tokio::time::sleep_until(deadline) => {
                // Whichever event won the race has already sent its value
                self.table.resolve(&self.id, Resolution::TimedOut);
                (&mut self.rx).await.unwrap_or(Resolution::ConnectionClosed)
            }
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        self.table.discard(&self.id);
    }
}

#[derive(Debug, Default)]
struct CorrelationCounters {
    relayed: AtomicU64,
    timed_out: AtomicU64,
    connection_closed: AtomicU64,
}

/// Counters reported by the stats endpoint
#[derive(Debug, Clone, Copy, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationStats {
    pub relayed: u64,
    pub timed_out: u64,
    pub connection_closed: u64,
}

/// Sends requests down control connections and waits for their resolution
pub struct Correlator {
    timeout: Duration,
    counters: CorrelationCounters,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            counters: CorrelationCounters::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Relay `request` over `connection` and wait for exactly one resolution
    ///
    /// Always produces a response: the client's, a 504 on timeout, or a 502
    /// when the connection closes or cannot be written to. The timeout covers
    /// queueing the request as well as waiting for the answer.
    pub async fn dispatch(
        &self,
        connection: &ControlConnection,
        request: TunnelRequest,
    ) -> Result<TunnelResponse> {
        let deadline = Instant::now() + self.timeout;
        let id = request.id.clone();
        let handle = connection.pending().insert(&id)?;

        let queued = tokio::time::timeout_at(
            deadline,
            connection.send(ServerMessage::Tunnel { data: request }),
        )
        .await;
        match queued {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to send request {} to tunnel client: {}", id, e);
                connection.pending().resolve(&id, Resolution::ConnectionClosed);
            }
            Err(_) => {
                warn!(
                    "Outbound queue of {} stayed full; request {} not sent",
                    connection.id(),
                    id
                );
                connection.pending().resolve(&id, Resolution::TimedOut);
            }
        }

        let resolution = handle.wait_until(deadline).await;
        let counter = match &resolution {
            Resolution::Response(_) => &self.counters.relayed,
            Resolution::TimedOut => {
                warn!("Request {} timed out after {:?}", id, self.timeout);
                &self.counters.timed_out
            }
            Resolution::ConnectionClosed => {
                debug!("Request {} failed: tunnel connection closed", id);
                &self.counters.connection_closed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);

        Ok(resolution.into_response(&id))
    }

    pub fn stats(&self) -> CorrelationStats {
        CorrelationStats {
            relayed: self.counters.relayed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            connection_closed: self.counters.connection_closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TunnelRegistry;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::mpsc;

    fn response(id: &str, status: u16) -> TunnelResponse {
        TunnelResponse::new(id.to_string(), status)
    }

    #[tokio::test]
    async fn test_resolve_with_response() {
        let table = Arc::new(PendingTable::new());
        let handle = table.insert("a").unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.resolve("a", Resolution::Response(response("a", 200))));
        assert!(table.is_empty());

        let resolution = handle.wait(Duration::from_secs(120)).await;
        assert_eq!(resolution, Resolution::Response(response("a", 200)));
    }

    #[tokio::test]
    async fn test_second_resolution_is_ignored() {
        let table = Arc::new(PendingTable::new());
        let handle = table.insert("a").unwrap();

        assert!(table.resolve("a", Resolution::Response(response("a", 201))));
        assert!(!table.resolve("a", Resolution::Response(response("a", 500))));
        assert!(!table.resolve("a", Resolution::TimedOut));

        let resolution = handle.wait(Duration::from_secs(1)).await;
        assert_eq!(resolution.into_response("a").status_code, 201);
    }

    #[tokio::test]
    async fn test_unknown_id_is_rejected() {
        let table = Arc::new(PendingTable::new());
        let _handle = table.insert("a").unwrap();

        assert!(!table.resolve("b", Resolution::Response(response("b", 200))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let table = Arc::new(PendingTable::new());
        let _handle = table.insert("a").unwrap();
        assert!(table.insert("a").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_gateway_timeout() {
        let table = Arc::new(PendingTable::new());
        let handle = table.insert("slow").unwrap();

        let resolution = handle.wait(Duration::from_secs(120)).await;
        assert_eq!(resolution, Resolution::TimedOut);
        assert!(table.is_empty());

        // A late response finds nothing to resolve
        assert!(!table.resolve("slow", Resolution::Response(response("slow", 200))));

        let synthetic = resolution.into_response("slow");
        assert_eq!(synthetic.status_code, 504);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_before_timeout_wins() {
        let table = Arc::new(PendingTable::new());
        let handle = table.insert("r").unwrap();

        let responder = Arc::clone(&table);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(119)).await;
            responder.resolve("r", Resolution::Response(response("r", 200)));
        });

        let resolution = handle.wait(Duration::from_secs(120)).await;
        assert_eq!(resolution, Resolution::Response(response("r", 200)));
    }

    #[tokio::test]
    async fn test_close_resolves_all_pending() {
        let table = Arc::new(PendingTable::new());
        let first = table.insert("one").unwrap();
        let second = table.insert("two").unwrap();

        assert_eq!(table.close(), 2);
        assert!(table.is_empty());
        assert!(table.is_closed());

        assert_eq!(first.wait(Duration::from_secs(5)).await, Resolution::ConnectionClosed);
        assert_eq!(second.wait(Duration::from_secs(5)).await, Resolution::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_insert_after_close_resolves_immediately() {
        let table = Arc::new(PendingTable::new());
        table.close();

        let handle = table.insert("late").unwrap();
        assert!(table.is_empty());
        assert_eq!(
            handle.wait(Duration::from_secs(5)).await.into_response("late").status_code,
            502
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_outbound_queue_still_times_out() {
        let registry = TunnelRegistry::new();
        // Nobody drains this queue, and it is already full
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(ServerMessage::Pong).unwrap();
        let connection = registry.attach(IpAddr::V4(Ipv4Addr::LOCALHOST), tx);

        let correlator = Correlator::new(Duration::from_secs(120));
        let start = Instant::now();
        let request = TunnelRequest::new("stuck".to_string(), "GET".to_string(), "/".to_string());

        let response = tokio::time::timeout(
            Duration::from_secs(600),
            correlator.dispatch(&connection, request),
        )
        .await
        .expect("dispatch must resolve within its timeout")
        .unwrap();

        assert_eq!(response.status_code, 504);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
        assert!(connection.pending().is_empty());
        assert_eq!(correlator.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_queue_counts_against_timeout() {
        let registry = TunnelRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(ServerMessage::Pong).unwrap();
        let connection = registry.attach(IpAddr::V4(Ipv4Addr::LOCALHOST), tx);

        // The writer frees a slot after 100s, then never answers
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            while rx.recv().await.is_some() {}
        });

        let correlator = Correlator::new(Duration::from_secs(120));
        let start = Instant::now();
        let request = TunnelRequest::new("late".to_string(), "GET".to_string(), "/".to_string());
        let response = correlator.dispatch(&connection, request).await.unwrap();

        assert_eq!(response.status_code, 504);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_dropped_handle_discards_entry() {
        let table = Arc::new(PendingTable::new());
        let handle = table.insert("gone").unwrap();
        drop(handle);

        assert!(table.is_empty());
        assert!(!table.resolve("gone", Resolution::Response(response("gone", 200))));
    }
}
