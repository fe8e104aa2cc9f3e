//! Targeted requests: talk to exactly one named cluster.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::gather::Outcome;
use crate::hub::ClusterHub;
use crate::protocol::Envelope;

impl ClusterHub {
    /// Ask cluster `id` to run `route` and return its reply value.
    ///
    /// Fails with [`RequestError::UnknownClient`] before any I/O if `id` is
    /// not registered. A timed-out cluster stays registered; a disconnected
    /// one is removed before the error is returned.
    pub async fn request(
        &self,
        id: &str,
        route: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let conn = self
            .registry()
            .get(id)
            .ok_or_else(|| RequestError::UnknownClient(id.to_string()))?;

        match conn.call(route, arguments, timeout).await {
            Outcome::Success(value) => Ok(value),
            Outcome::RemoteFailure(reason) => Err(RequestError::RemoteFailure {
                identifier: id.to_string(),
                reason,
            }),
            Outcome::Timeout => {
                self.note_timeout(&conn);
                Err(RequestError::Timeout(id.to_string()))
            }
            Outcome::Disconnected => {
                self.note_disconnect(&conn);
                Err(RequestError::Disconnected(id.to_string()))
            }
        }
    }

    /// One-way delivery of `envelope` to cluster `id`.
    pub fn send_to(&self, id: &str, envelope: Envelope) -> Result<(), RequestError> {
        let conn = self
            .registry()
            .get(id)
            .ok_or_else(|| RequestError::UnknownClient(id.to_string()))?;

        if conn.send(envelope) {
            Ok(())
        } else {
            self.note_disconnect(&conn);
            Err(RequestError::Disconnected(id.to_string()))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
