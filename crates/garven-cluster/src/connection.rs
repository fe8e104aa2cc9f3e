//! ClusterConnection: the hub's handle on one cluster socket.
//!
//! The socket itself is owned by the transport layer. The hub talks to it
//! through an outbound channel (drained by a writer task) and is fed inbound
//! frames by the connection's receive loop via [`ClusterConnection::handle_frame`].
//! Requests are correlated with replies by a per-connection nonce.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::gather::Outcome;
use crate::protocol::{Envelope, ReplyStatus};

// ─────────────────────────────────────────────
// ConnectionState
// ─────────────────────────────────────────────

/// Lifecycle of a cluster connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket accepted, identify packet not yet validated.
    Connecting = 0,
    /// Identified and admitted to the registry.
    Identified = 1,
    /// Closed by either side. Terminal.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Identified,
            _ => ConnectionState::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Identified => write!(f, "identified"),
            ConnectionState::Closed     => write!(f, "closed"),
        }
    }
}

// ─────────────────────────────────────────────
// Outbound / Inbound
// ─────────────────────────────────────────────

/// Work item for the transport's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame holding an encoded envelope.
    Frame(String),
    /// Close the socket with this code and reason. Nothing is sent after it.
    Close { code: u16, reason: String },
}

/// What the receive loop should make of one inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// A reply was delivered to a waiting request.
    Replied,
    /// A reply for a nonce nobody is waiting on (timed out or unknown).
    Stale(u64),
    /// A well-formed envelope that is not a reply.
    Unsolicited(Envelope),
    /// Not a valid envelope; the cluster has been told with `INVALID_PAYLOAD`.
    Invalid(ProtocolError),
}

// ─────────────────────────────────────────────
// ClusterConnection
// ─────────────────────────────────────────────

struct Inner {
    identifier: OnceLock<String>,
    /// Distinguishes successive connections that share an identifier.
    session: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: DashMap<u64, oneshot::Sender<ReplyStatus>>,
    next_nonce: AtomicU64,
    state: AtomicU8,
    last_activity_ms: AtomicU64,
    consecutive_timeouts: AtomicU32,
}

/// Shared handle on one cluster connection.
///
/// Cloning is cheap; all clones refer to the same socket.
#[derive(Clone)]
pub struct ClusterConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("identifier", &self.identifier())
            .field("session", &self.inner.session)
            .field("state", &self.state())
            .finish()
    }
}

impl ClusterConnection {
    /// Create a `Connecting` handle plus the receiver the writer task drains.
    pub fn new(identifier: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        Self::build(OnceLock::from(identifier.into()))
    }

    fn build(identifier: OnceLock<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(Inner {
                identifier,
                session: Uuid::new_v4(),
                outbound: tx,
                pending: DashMap::new(),
                next_nonce: AtomicU64::new(1),
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                last_activity_ms: AtomicU64::new(now_ms()),
                consecutive_timeouts: AtomicU32::new(0),
            }),
        };
        (conn, rx)
    }

    /// A handle for a socket that has not identified yet.
    pub fn connecting() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        Self::build(OnceLock::new())
    }

    /// Bind the identifier from the identify packet. Only the first call wins.
    pub(crate) fn assign_identifier(&self, identifier: &str) -> bool {
        self.inner.identifier.set(identifier.to_string()).is_ok()
            || self.identifier() == identifier
    }

    /// Empty until the identify packet has been accepted.
    pub fn identifier(&self) -> &str {
        self.inner.identifier.get().map(String::as_str).unwrap_or("")
    }

    pub fn session(&self) -> Uuid {
        self.inner.session
    }

    /// `true` when both handles refer to the same socket session.
    pub fn same_session(&self, other: &ClusterConnection) -> bool {
        self.inner.session == other.inner.session
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Promote `Connecting` → `Identified`. Returns `false` if already closed.
    pub(crate) fn mark_identified(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Identified as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Unix timestamp (ms) of the last inbound frame or successful reply.
    pub fn last_activity_ms(&self) -> u64 {
        self.inner.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.inner.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.inner.consecutive_timeouts.load(Ordering::Relaxed)
    }

    /// Requests currently awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Queue an envelope for the writer task. Never blocks.
    ///
    /// Returns `false` if the connection is closed or its writer is gone.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.outbound.send(Outbound::Frame(envelope.to_text())).is_ok()
    }

    /// Close the connection with a WebSocket close code.
    ///
    /// Only the first call has any effect; it returns `true`. Requests still
    /// waiting on this connection resolve as [`Outcome::Disconnected`].
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let prev = self.inner.state.swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if prev == ConnectionState::Closed as u8 {
            return false;
        }
        let _ = self.inner.outbound.send(Outbound::Close { code, reason: reason.into() });
        self.inner.pending.clear();
        true
    }

    /// Record that the transport went away underneath us.
    pub fn mark_closed(&self) {
        self.inner.state.store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.inner.pending.clear();
    }

    /// Send a routed request and wait for its reply, bounded by `timeout`.
    ///
    /// A timed-out connection stays open; the late reply, if any, is dropped.
    pub async fn call(
        &self,
        route: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Outcome {
        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(nonce, tx);

        // `close` flips the state before clearing `pending`, so checking after
        // the insert cannot miss a concurrent close.
        if self.is_closed() || !self.send(Envelope::request(nonce, route, arguments)) {
            self.inner.pending.remove(&nonce);
            return Outcome::Disconnected;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => {
                self.inner.consecutive_timeouts.store(0, Ordering::Relaxed);
                match status {
                    ReplyStatus::Success { data } => Outcome::Success(data),
                    ReplyStatus::Failure { reason } => Outcome::RemoteFailure(reason),
                }
            }
            Ok(Err(_)) => Outcome::Disconnected,
            Err(_) => {
                self.inner.pending.remove(&nonce);
                self.inner.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
                Outcome::Timeout
            }
        }
    }

    /// Process one inbound frame from the cluster.
    pub fn handle_frame(&self, bytes: &[u8]) -> Inbound {
        self.touch();
        match Envelope::decode(bytes) {
            Ok(Envelope::Response(reply)) => match self.inner.pending.remove(&reply.nonce) {
                Some((_, waiter)) => {
                    let _ = waiter.send(reply.status);
                    Inbound::Replied
                }
                None => Inbound::Stale(reply.nonce),
            },
            Ok(other) => Inbound::Unsolicited(other),
            Err(e) => {
                self.send(Envelope::InvalidPayload(format!("Your WS payload was not valid: {e}")));
                Inbound::Invalid(e)
            }
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Code};
    use serde_json::json;

    fn next_request(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> crate::protocol::Request {
        match rx.try_recv().unwrap() {
            Outbound::Frame(text) => match Envelope::decode(text.as_bytes()).unwrap() {
                Envelope::Request(req) => req,
                other => panic!("expected a request, got {other:?}"),
            },
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn starts_connecting_and_identifies_once() {
        let (conn, _rx) = ClusterConnection::new("1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_identified());
        assert!(!conn.mark_identified());
        assert_eq!(conn.state(), ConnectionState::Identified);
    }

    #[test]
    fn close_is_idempotent_and_emits_one_close() {
        let (conn, mut rx) = ClusterConnection::new("1");
        assert!(conn.close(1000, "bye"));
        assert!(!conn.close(1000, "again"));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close { code: 1000, reason: "bye".into() });
        assert!(rx.try_recv().is_err());
        assert!(!conn.send(Envelope::message("late")));
    }

    #[tokio::test]
    async fn call_resolves_with_matching_reply() {
        let (conn, mut rx) = ClusterConnection::new("1");
        let peer = conn.clone();
        let handle = tokio::spawn(async move {
            peer.call("guild_count", Map::new(), Duration::from_secs(5)).await
        });

        tokio::task::yield_now().await;
        while conn.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        let req = next_request(&mut rx);
        assert_eq!(req.route, "guild_count");

        let reply = Envelope::success(req.nonce, json!(12)).to_text();
        assert!(matches!(conn.handle_frame(reply.as_bytes()), Inbound::Replied));
        assert_eq!(handle.await.unwrap(), Outcome::Success(json!(12)));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn call_times_out_and_counts() {
        let (conn, _rx) = ClusterConnection::new("1");
        let outcome = conn.call("slow", Map::new(), Duration::from_millis(20)).await;
        assert_eq!(outcome, Outcome::Timeout);
        assert_eq!(conn.consecutive_timeouts(), 1);
        assert_eq!(conn.pending_requests(), 0);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn close_wakes_waiters_as_disconnected() {
        let (conn, _rx) = ClusterConnection::new("1");
        let peer = conn.clone();
        let handle = tokio::spawn(async move {
            peer.call("anything", Map::new(), Duration::from_secs(5)).await
        });
        while conn.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        conn.mark_closed();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);
    }

    #[tokio::test]
    async fn call_on_dropped_writer_is_disconnected() {
        let (conn, rx) = ClusterConnection::new("1");
        drop(rx);
        let outcome = conn.call("x", Map::new(), Duration::from_secs(1)).await;
        assert_eq!(outcome, Outcome::Disconnected);
    }

    #[test]
    fn stale_reply_is_ignored() {
        let (conn, _rx) = ClusterConnection::new("1");
        let reply = Envelope::success(99, json!(null)).to_text();
        assert!(matches!(conn.handle_frame(reply.as_bytes()), Inbound::Stale(99)));
    }

    #[test]
    fn invalid_frame_answers_with_4001() {
        let (conn, mut rx) = ClusterConnection::new("1");
        assert!(matches!(conn.handle_frame(b"{nope"), Inbound::Invalid(_)));
        match rx.try_recv().unwrap() {
            Outbound::Frame(text) => {
                let (code, _) = decode(text.as_bytes()).unwrap();
                assert_eq!(code, Code::InvalidPayload);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!conn.is_closed());
    }
}
