//! Error types for the cluster hub.

use thiserror::Error;

// ─────────────────────────────────────────────
// Close codes
// ─────────────────────────────────────────────

/// Close code: the identify packet carried the wrong shared secret.
pub const CLOSE_INVALID_SECRET: u16 = 4100;
/// Close code: the first frame was missing, late, or not an identify packet.
pub const CLOSE_IDENTIFY_FAILED: u16 = 4101;
/// Close code: the identifier is taken and no valid override key was given.
pub const CLOSE_OVERRIDE_REQUIRED: u16 = 4102;
/// Close code sent to a connection replaced by a newer one (RFC 6455 1008).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code for a normal hub-initiated disconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for a peer dropped after too many consecutive timeouts.
pub const CLOSE_UNRESPONSIVE: u16 = 1011;

// ─────────────────────────────────────────────
// ProtocolError
// ─────────────────────────────────────────────

/// A frame could not be decoded into an envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown envelope code {0}")]
    UnknownCode(u16),

    #[error("payload for code {code} is invalid: {reason}")]
    InvalidPayload { code: u16, reason: String },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

// ─────────────────────────────────────────────
// IdentifyError
// ─────────────────────────────────────────────

/// Why a new connection was refused during the identify handshake.
///
/// Every variant terminates only the offending connection attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifyError {
    #[error("invalid secret key")]
    InvalidSecret,

    #[error("identifier '{0}' is already connected and no valid override key was supplied")]
    OverrideRequired(String),

    #[error("identify payload invalid: {0}")]
    Malformed(String),

    #[error("no identify packet within the identify timeout")]
    Timeout,

    #[error("connection closed before identifying")]
    Closed,
}

impl IdentifyError {
    /// WebSocket close code the hub answers this failure with.
    pub fn close_code(&self) -> u16 {
        match self {
            IdentifyError::InvalidSecret => CLOSE_INVALID_SECRET,
            IdentifyError::OverrideRequired(_) => CLOSE_OVERRIDE_REQUIRED,
            IdentifyError::Malformed(_) | IdentifyError::Timeout | IdentifyError::Closed => {
                CLOSE_IDENTIFY_FAILED
            }
        }
    }

    /// Short close reason (close frames cap the reason at 123 bytes).
    pub fn close_reason(&self) -> &'static str {
        match self {
            IdentifyError::InvalidSecret => "Invalid secret key",
            IdentifyError::OverrideRequired(_) => "Override required",
            _ => "Identify failed",
        }
    }
}

// ─────────────────────────────────────────────
// RequestError
// ─────────────────────────────────────────────

/// Failure of a targeted request to one cluster.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("no cluster connected with identifier '{0}'")]
    UnknownClient(String),

    #[error("cluster '{0}' did not reply in time")]
    Timeout(String),

    #[error("cluster '{identifier}' reported a failure: {reason}")]
    RemoteFailure { identifier: String, reason: String },

    #[error("cluster '{0}' disconnected")]
    Disconnected(String),
}
