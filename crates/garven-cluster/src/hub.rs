//! ClusterHub: the single object the rest of the process talks to.
//!
//! Owns the [`ConnectionRegistry`] and the handshake settings. It is built
//! once at startup and handed (by clone) to every component that needs it;
//! there is no global state.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::connection::{ClusterConnection, Inbound};
use crate::error::{IdentifyError, CLOSE_NORMAL, CLOSE_UNRESPONSIVE};
use crate::identify::{Frame, Handshake, IdentifyConfig};
use crate::protocol::Envelope;
use crate::registry::ConnectionRegistry;

// ─────────────────────────────────────────────
// HubConfig
// ─────────────────────────────────────────────

/// Settings the hub consumes. Loaded by the process, not by this crate.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub identify: IdentifyConfig,
    /// Default per-peer deadline for routed requests.
    pub request_timeout: Duration,
    /// Disconnect a peer after this many timeouts in a row (0 = never).
    pub max_consecutive_timeouts: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            identify: IdentifyConfig::default(),
            request_timeout: Duration::from_secs(5),
            max_consecutive_timeouts: 0,
        }
    }
}

// ─────────────────────────────────────────────
// ClusterHub
// ─────────────────────────────────────────────

/// Connection registry plus the operations exposed to the HTTP layer.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct ClusterHub {
    registry: ConnectionRegistry,
    handshake: Handshake,
    config: Arc<HubConfig>,
}

impl ClusterHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            handshake: Handshake::new(&config.identify),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    // ── Admission ────────────────────────────────────────────

    /// Run the identify handshake on a fresh socket and admit it on success.
    pub async fn identify<S>(
        &self,
        conn: &ClusterConnection,
        frames: &mut S,
    ) -> Result<String, IdentifyError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        self.handshake.run(conn, frames, &self.registry).await
    }

    /// Admit a connection, evicting any prior one under its identifier.
    ///
    /// See [`ConnectionRegistry::admit`]: closed handles are never stored.
    pub fn admit(&self, conn: ClusterConnection) -> Option<ClusterConnection> {
        self.registry.admit(conn)
    }

    /// Drop a cluster from the registry and close its socket.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.registry.remove(id) {
            Some(conn) => {
                conn.close(CLOSE_NORMAL, "Disconnected by hub");
                true
            }
            None => false,
        }
    }

    /// Close every connection. Clusters must re-identify after a restart.
    pub fn shutdown(&self) {
        let snapshot = self.registry.snapshot();
        info!(clusters = snapshot.len(), "closing all cluster connections");
        for (id, conn) in snapshot {
            conn.close(CLOSE_NORMAL, "Hub shutting down");
            self.registry.remove_connection(&conn);
            debug!(cluster = %id, "closed on shutdown");
        }
    }

    // ── Fan-out without replies ──────────────────────────────

    /// Send `envelope` to every registered cluster without waiting for replies.
    ///
    /// Returns how many clusters accepted the frame. Clusters whose writer is
    /// gone are removed.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        let mut delivered = 0;
        for (id, conn) in self.registry.snapshot() {
            if conn.send(envelope.clone()) {
                delivered += 1;
            } else {
                warn!(cluster = %id, "broadcast target is gone");
                self.registry.remove_connection(&conn);
            }
        }
        delivered
    }

    // ── Receive loop ─────────────────────────────────────────

    /// Drive one identified connection until its socket goes away.
    ///
    /// Always ends by removing this session from the registry.
    pub async fn serve<S>(&self, conn: ClusterConnection, mut frames: S)
    where
        S: Stream<Item = Frame> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            let bytes = match frame {
                Frame::Text(text) => text.into_bytes(),
                Frame::Binary(bytes) => bytes,
                Frame::Close => break,
            };
            match conn.handle_frame(&bytes) {
                Inbound::Replied => {}
                Inbound::Stale(nonce) => {
                    debug!(
                        cluster = %conn.identifier(),
                        nonce,
                        "reply for a request nobody is waiting on"
                    );
                }
                Inbound::Unsolicited(envelope) => {
                    debug!(
                        cluster = %conn.identifier(),
                        code = %envelope.code(),
                        "ignoring unsolicited envelope"
                    );
                }
                Inbound::Invalid(e) => {
                    warn!(cluster = %conn.identifier(), error = %e, "invalid payload from cluster");
                }
            }
        }

        conn.mark_closed();
        self.registry.remove_connection(&conn);
        info!(cluster = %conn.identifier(), "cluster connection closed");
    }

    // ── Timeout policy ───────────────────────────────────────

    /// Apply the repeated-timeout policy after `conn` timed out.
    pub(crate) fn note_timeout(&self, conn: &ClusterConnection) {
        let limit = self.config.max_consecutive_timeouts;
        let count = conn.consecutive_timeouts();
        warn!(cluster = %conn.identifier(), consecutive = count, "cluster request timed out");

        if limit > 0 && count >= limit {
            warn!(cluster = %conn.identifier(), limit, "cluster unresponsive, disconnecting");
            conn.close(CLOSE_UNRESPONSIVE, "Too many timeouts");
            self.registry.remove_connection(conn);
        }
    }

    /// Remove a connection whose transport was found closed mid-request.
    pub(crate) fn note_disconnect(&self, conn: &ClusterConnection) {
        warn!(cluster = %conn.identifier(), "cluster disconnected during request");
        conn.mark_closed();
        self.registry.remove_connection(conn);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
