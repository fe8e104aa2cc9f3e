//! Identify handshake: admission control for new cluster sockets.
//!
//! The first frame on a fresh socket must be an identify packet:
//!
//! ```json
//! {"identifier": "3", "type": "IDENTIFY", "data": {"secret_key": "...", "override_key": "..."}}
//! ```
//!
//! Secrets are compared as SHA-256 digests using constant-time equality.
//! Any failure closes only the offending socket with the matching close code
//! (see [`IdentifyError::close_code`]); the registry is never touched.

use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::connection::ClusterConnection;
use crate::error::IdentifyError;
use crate::registry::ConnectionRegistry;

// ─────────────────────────────────────────────
// Frames
// ─────────────────────────────────────────────

/// Transport-neutral view of one inbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// The peer sent a close frame or the stream ended.
    Close,
}

// ─────────────────────────────────────────────
// Identify packet
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketType {
    Identify,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    /// Shared secret every cluster must present.
    pub secret_key: String,
    /// Allows replacing a connection that is already registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_key: Option<String>,
}

impl std::fmt::Debug for IdentifyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyData")
            .field("secret_key", &"<redacted>")
            .field("override_key", &self.override_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPacket {
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: PacketType,
    pub data: IdentifyData,
}

impl IdentifyPacket {
    pub fn new(identifier: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: PacketType::Identify,
            data: IdentifyData { secret_key: secret_key.into(), override_key: None },
        }
    }

    pub fn with_override(mut self, override_key: impl Into<String>) -> Self {
        self.data.override_key = Some(override_key.into());
        self
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, IdentifyError> {
        let packet: IdentifyPacket =
            serde_json::from_slice(bytes).map_err(|e| IdentifyError::Malformed(e.to_string()))?;
        if packet.identifier.trim().is_empty() {
            return Err(IdentifyError::Malformed("identifier must not be empty".into()));
        }
        Ok(packet)
    }
}

// ─────────────────────────────────────────────
// IdentifyConfig
// ─────────────────────────────────────────────

/// Handshake settings, supplied by the process configuration.
#[derive(Clone)]
pub struct IdentifyConfig {
    /// Shared secret every cluster must present.
    pub secret_key: String,
    /// Secret allowing a cluster to replace a live connection. `None` disables overrides.
    pub override_key: Option<String>,
    /// How long a new socket has to send its identify packet.
    pub timeout: Duration,
}

impl std::fmt::Debug for IdentifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyConfig")
            .field("override_enabled", &self.override_key.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            override_key: None,
            timeout: Duration::from_secs(5),
        }
    }
}

// ─────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────

/// Runs the identify handshake against a new socket.
#[derive(Clone)]
pub struct Handshake {
    secret_hash: String,
    override_hash: Option<String>,
    timeout: Duration,
}

impl Handshake {
    pub fn new(config: &IdentifyConfig) -> Self {
        Self {
            secret_hash: sha256_hex(&config.secret_key),
            override_hash: config.override_key.as_deref().map(sha256_hex),
            timeout: config.timeout,
        }
    }

    /// Read exactly one frame, bounded by the identify timeout, and parse it.
    pub async fn read_packet<S>(&self, frames: &mut S) -> Result<IdentifyPacket, IdentifyError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        match tokio::time::timeout(self.timeout, frames.next()).await {
            Err(_) => Err(IdentifyError::Timeout),
            Ok(None) | Ok(Some(Frame::Close)) => Err(IdentifyError::Closed),
            Ok(Some(Frame::Text(text))) => IdentifyPacket::parse(text.as_bytes()),
            Ok(Some(Frame::Binary(bytes))) => IdentifyPacket::parse(&bytes),
        }
    }

    /// Check credentials against the configured secrets and current registry.
    pub fn authorize(
        &self,
        packet: &IdentifyPacket,
        registry: &ConnectionRegistry,
    ) -> Result<(), IdentifyError> {
        if !matches_hash(&packet.data.secret_key, &self.secret_hash) {
            return Err(IdentifyError::InvalidSecret);
        }

        if registry.contains(&packet.identifier) {
            let allowed = match (&self.override_hash, &packet.data.override_key) {
                (Some(expected), Some(given)) => matches_hash(given, expected),
                _ => false,
            };
            if !allowed {
                return Err(IdentifyError::OverrideRequired(packet.identifier.clone()));
            }
        }
        Ok(())
    }

    /// Full handshake: read, authorize, promote to `Identified`, admit.
    ///
    /// On failure the connection is closed with the error's close code and
    /// never appears in the registry.
    pub async fn run<S>(
        &self,
        conn: &ClusterConnection,
        frames: &mut S,
        registry: &ConnectionRegistry,
    ) -> Result<String, IdentifyError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        let result = self.admit(conn, frames, registry).await;
        if let Err(e) = &result {
            warn!(error = %e, close_code = e.close_code(), "identify failed");
            conn.close(e.close_code(), e.close_reason());
        }
        result
    }

    async fn admit<S>(
        &self,
        conn: &ClusterConnection,
        frames: &mut S,
        registry: &ConnectionRegistry,
    ) -> Result<String, IdentifyError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        let packet = self.read_packet(frames).await?;
        self.authorize(&packet, registry)?;

        if !conn.assign_identifier(&packet.identifier) || !conn.mark_identified() {
            return Err(IdentifyError::Closed);
        }
        registry.admit(conn.clone());
        info!(cluster = %packet.identifier, session = %conn.session(), "cluster identified");
        Ok(packet.identifier)
    }
}

/// Lowercase hex SHA-256 of `value`. Secrets are only ever stored in this form.
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn matches_hash(given: &str, expected_hash: &str) -> bool {
    constant_time_eq(sha256_hex(given).as_bytes(), expected_hash.as_bytes())
}

/// Constant-time byte comparison (prevents timing attacks).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
