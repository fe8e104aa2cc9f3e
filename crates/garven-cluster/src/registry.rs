//! ConnectionRegistry: identifier → live connection table.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::{ClusterConnection, ConnectionState};
use crate::error::CLOSE_POLICY_VIOLATION;
use crate::protocol::Envelope;

// ─────────────────────────────────────────────
// ConnectionRegistry
// ─────────────────────────────────────────────

/// Thread-safe table of every identified cluster connection.
///
/// Holds at most one connection per identifier. Structural changes are single
/// map operations; no shard lock is ever held while talking to a socket.
///
/// Cloning the registry is cheap; it shares the same underlying
/// `DashMap` via `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ClusterConnection>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ─────────────────────────────────────────

    /// Install `conn` under its identifier, evicting whatever was there.
    ///
    /// The evicted connection, if any, is sent a duplicate-connection notice
    /// and then closed, after the map insert has released its lock. Both are
    /// channel pushes and never block. Returns the evicted connection.
    ///
    /// Only `Identified` connections are stored: a `Connecting` handle is
    /// promoted first, and a closed one is dropped without touching the table.
    pub fn admit(&self, conn: ClusterConnection) -> Option<ClusterConnection> {
        conn.mark_identified();
        if conn.state() != ConnectionState::Identified {
            debug!(
                cluster = %conn.identifier(),
                session = %conn.session(),
                "not admitting a closed connection"
            );
            return None;
        }

        let id = conn.identifier().to_string();
        let evicted = self.connections.insert(id.clone(), conn);

        match &evicted {
            Some(prior) => {
                let notice = Envelope::duplicate_connection(&id);
                let (_, reason) = notice.clone().into_parts();
                prior.send(notice);
                prior.close(CLOSE_POLICY_VIOLATION, truncate_reason(reason));
                info!(
                    cluster = %id,
                    evicted_session = %prior.session(),
                    "replaced existing cluster connection"
                );
            }
            None => info!(cluster = %id, "registered cluster connection"),
        }
        evicted
    }

    /// Remove whatever is registered under `id`. No-op if absent.
    pub fn remove(&self, id: &str) -> Option<ClusterConnection> {
        let removed = self.connections.remove(id).map(|(_, c)| c);
        if removed.is_some() {
            info!(cluster = %id, "removed cluster connection");
        }
        removed
    }

    /// Remove `conn` only if it is still the registered session for its id.
    ///
    /// A connection that was already replaced never takes its successor
    /// down with it.
    pub fn remove_connection(&self, conn: &ClusterConnection) -> bool {
        let removed = self
            .connections
            .remove_if(conn.identifier(), |_, current| current.same_session(conn))
            .is_some();
        if removed {
            info!(cluster = %conn.identifier(), "removed cluster connection");
        } else {
            debug!(
                cluster = %conn.identifier(),
                session = %conn.session(),
                "stale session, nothing to remove"
            );
        }
        removed
    }

    // ── Queries ──────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<ClusterConnection> {
        self.connections.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Point-in-time copy of every entry, sorted by identifier.
    ///
    /// Later admits and removals do not affect a snapshot already taken.
    pub fn snapshot(&self) -> Vec<(String, ClusterConnection)> {
        let mut entries: Vec<(String, ClusterConnection)> = self
            .connections
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Sorted identifiers of every registered cluster.
    pub fn identifiers(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Close reasons are limited to 123 bytes by RFC 6455.
fn truncate_reason(mut reason: String) -> String {
    const MAX: usize = 123;
    if reason.len() > MAX {
        let mut cut = MAX;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    reason
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
