//! Scatter/gather: one request to every cluster, one outcome per cluster.
//!
//! The registry is snapshotted once; each peer in the snapshot gets its own
//! future carrying its own deadline, and all of them are joined. A slow peer
//! only ever costs its own timeout.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::debug;

use crate::hub::ClusterHub;

// ─────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────

/// Result of asking one cluster for something.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The cluster replied successfully with this value.
    Success(Value),
    /// The cluster replied, reporting a failure.
    RemoteFailure(String),
    /// No reply within the deadline. The connection is kept.
    Timeout,
    /// The socket went away before a reply arrived. The connection is removed.
    Disconnected,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_)       => "success",
            Outcome::RemoteFailure(_) => "remote_failure",
            Outcome::Timeout          => "timeout",
            Outcome::Disconnected     => "disconnected",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::RemoteFailure(reason) => write!(f, "remote_failure: {reason}"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Per-cluster outcomes of one scatter/gather call, keyed by identifier.
pub type Outcomes = HashMap<String, Outcome>;

// ─────────────────────────────────────────────
// request_all
// ─────────────────────────────────────────────

impl ClusterHub {
    /// Ask every registered cluster to run `route` and collect one outcome each.
    ///
    /// Never fails as a whole: an empty registry gives an empty map, and each
    /// peer's timeout or disconnect is recorded in its own entry. Peers that
    /// disconnect mid-call are removed from the registry before returning.
    pub async fn request_all(
        &self,
        route: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Outcomes {
        let snapshot = self.registry().snapshot();
        if snapshot.is_empty() {
            return Outcomes::new();
        }

        let calls = snapshot.into_iter().map(|(id, conn)| {
            let arguments = arguments.clone();
            async move {
                let outcome = conn.call(route, arguments, timeout).await;
                (id, conn, outcome)
            }
        });

        let mut outcomes = Outcomes::new();
        for (id, conn, outcome) in join_all(calls).await {
            match &outcome {
                Outcome::Timeout => self.note_timeout(&conn),
                Outcome::Disconnected => self.note_disconnect(&conn),
                Outcome::Success(_) | Outcome::RemoteFailure(_) => {}
            }
            debug!(cluster = %id, route, outcome = outcome.kind(), "gathered");
            outcomes.insert(id, outcome);
        }
        outcomes
    }

    /// [`ClusterHub::request_all`] with the configured request timeout.
    pub async fn request_all_default(
        &self,
        route: &str,
        arguments: Map<String, Value>,
    ) -> Outcomes {
        self.request_all(route, arguments, self.request_timeout()).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ClusterConnection, Outbound};
    use crate::hub::HubConfig;
    use crate::protocol::Envelope;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Answer every request on `rx` by feeding `reply(route)` back into `conn`.
    fn spawn_peer<F>(conn: ClusterConnection, mut rx: UnboundedReceiver<Outbound>, reply: F)
    where
        F: Fn(&str) -> Option<Envelope> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(Outbound::Frame(text)) = rx.recv().await {
                if let Ok(Envelope::Request(req)) = Envelope::decode(text.as_bytes()) {
                    if let Some(env) = reply(&req.route) {
                        let answer = match env {
                            Envelope::Response(mut r) => {
                                r.nonce = req.nonce;
                                Envelope::Response(r)
                            }
                            other => other,
                        };
                        conn.handle_frame(answer.to_text().as_bytes());
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn empty_registry_gives_empty_map() {
        let hub = ClusterHub::new(HubConfig::default());
        let outcomes = hub.request_all("guild_count", Map::new(), Duration::from_millis(10)).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn every_peer_gets_exactly_one_outcome() {
        let hub = ClusterHub::new(HubConfig::default());

        let (ok, ok_rx) = ClusterConnection::new("ok");
        let (bad, bad_rx) = ClusterConnection::new("bad");
        let (gone, gone_rx) = ClusterConnection::new("gone");
        for c in [&ok, &bad, &gone] {
            hub.admit(c.clone());
        }
        spawn_peer(ok, ok_rx, |_| Some(Envelope::success(0, json!(3))));
        spawn_peer(bad, bad_rx, |_| Some(Envelope::failure(0, "no cache")));
        drop(gone_rx);

        let outcomes = hub.request_all("guild_count", Map::new(), Duration::from_secs(2)).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["ok"], Outcome::Success(json!(3)));
        assert_eq!(outcomes["bad"], Outcome::RemoteFailure("no cache".into()));
        assert_eq!(outcomes["gone"], Outcome::Disconnected);
        assert!(!hub.registry().contains("gone"));
        assert!(hub.registry().contains("bad"));
    }

    #[tokio::test]
    async fn repeated_timeouts_disconnect_when_enabled() {
        let hub = ClusterHub::new(HubConfig {
            max_consecutive_timeouts: 2,
            ..HubConfig::default()
        });
        let (slow, _slow_rx) = ClusterConnection::new("slow");
        hub.admit(slow.clone());

        let first = hub.request_all("x", Map::new(), Duration::from_millis(10)).await;
        assert_eq!(first["slow"], Outcome::Timeout);
        assert!(hub.registry().contains("slow"));

        let second = hub.request_all("x", Map::new(), Duration::from_millis(10)).await;
        assert_eq!(second["slow"], Outcome::Timeout);
        assert!(!hub.registry().contains("slow"));
        assert!(slow.is_closed());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Timeout.to_string(), "timeout");
        assert_eq!(Outcome::RemoteFailure("x".into()).to_string(), "remote_failure: x");
        assert!(Outcome::Success(json!(1)).is_success());
        assert_eq!(Outcome::Disconnected.value(), None);
    }
}
