//! Wire protocol spoken between the hub and its clusters.
//!
//! Every frame is a compact JSON envelope:
//!
//! ```json
//! { "code": 5, "text": "{\"nonce\":7,\"route\":\"guild_count\",\"arguments\":{}}" }
//! ```
//!
//! The raw layer ([`encode`] / [`decode`]) only knows `(code, text)` pairs.
//! The typed layer ([`Envelope`]) fixes the shape of `text` per code and
//! decodes it exhaustively; a payload that does not fit its code is an error.
//!
//! | Code | Name                   | Direction       |
//! |------|------------------------|-----------------|
//! | 1    | `DUPLICATE_CONNECTION` | hub → cluster   |
//! | 2    | `MESSAGE`              | hub → cluster   |
//! | 3    | `RESPONSE`             | cluster → hub   |
//! | 4    | `GUILD_COUNT`          | hub → cluster   |
//! | 5    | `REQUEST`              | hub → cluster   |
//! | 4001 | `INVALID_PAYLOAD`      | hub → cluster   |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// ─────────────────────────────────────────────
// Code
// ─────────────────────────────────────────────

/// Numeric envelope code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Code {
    DuplicateConnection = 1,
    Message             = 2,
    Response            = 3,
    GuildCount          = 4,
    Request             = 5,
    InvalidPayload      = 4001,
}

impl Code {
    /// Every code the hub understands.
    pub const ALL: [Code; 6] = [
        Code::DuplicateConnection,
        Code::Message,
        Code::Response,
        Code::GuildCount,
        Code::Request,
        Code::InvalidPayload,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Code {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Code::ALL
            .into_iter()
            .find(|c| c.as_u16() == value)
            .ok_or(ProtocolError::UnknownCode(value))
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Code::DuplicateConnection => write!(f, "DUPLICATE_CONNECTION"),
            Code::Message             => write!(f, "MESSAGE"),
            Code::Response            => write!(f, "RESPONSE"),
            Code::GuildCount          => write!(f, "GUILD_COUNT"),
            Code::Request             => write!(f, "REQUEST"),
            Code::InvalidPayload      => write!(f, "INVALID_PAYLOAD"),
        }
    }
}

// ─────────────────────────────────────────────
// Raw layer
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct WireOut<'a> {
    code: u16,
    text: &'a str,
}

#[derive(Deserialize)]
struct WireIn {
    code: u16,
    text: String,
}

/// Encode a `(code, text)` pair into a JSON envelope.
pub fn encode(code: Code, text: &str) -> Vec<u8> {
    serde_json::to_vec(&WireOut { code: code.as_u16(), text }).unwrap_or_default()
}

/// Decode a JSON envelope into its `(code, text)` pair.
///
/// Fails on anything that is not `{"code": <known int>, "text": <string>}`.
pub fn decode(bytes: &[u8]) -> Result<(Code, String), ProtocolError> {
    let wire: WireIn = serde_json::from_slice(bytes)?;
    let code = Code::try_from(wire.code)?;
    Ok((code, wire.text))
}

// ─────────────────────────────────────────────
// Typed payloads
// ─────────────────────────────────────────────

/// A routed request from the hub to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the cluster's [`Reply`] with this request.
    pub nonce: u64,
    /// Name of the handler the cluster should run, e.g. `"guild_count"`.
    pub route: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A cluster's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub nonce: u64,
    #[serde(flatten)]
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyStatus {
    Success {
        #[serde(default)]
        data: Value,
    },
    Failure {
        reason: String,
    },
}

// ─────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────

/// A decoded envelope. The payload shape is fixed by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Sent to a connection just before it is replaced by a newer one.
    DuplicateConnection { notice: String },
    /// Free-form text for the cluster to act on or log.
    Message(String),
    /// A cluster's reply to a routed request.
    Response(Reply),
    /// Legacy guild count request. Carries no payload.
    GuildCount,
    /// A routed request expecting exactly one [`Envelope::Response`].
    Request(Request),
    /// The hub could not make sense of a frame the cluster sent.
    InvalidPayload(String),
}

impl Envelope {
    pub fn duplicate_connection(identifier: &str) -> Self {
        Envelope::DuplicateConnection {
            notice: format!(
                "Closing as new connection for cluster {identifier} is being established"
            ),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Envelope::Message(text.into())
    }

    pub fn guild_count() -> Self {
        Envelope::GuildCount
    }

    pub fn request(nonce: u64, route: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Envelope::Request(Request { nonce, route: route.into(), arguments })
    }

    pub fn success(nonce: u64, data: Value) -> Self {
        Envelope::Response(Reply { nonce, status: ReplyStatus::Success { data } })
    }

    pub fn failure(nonce: u64, reason: impl Into<String>) -> Self {
        Envelope::Response(Reply {
            nonce,
            status: ReplyStatus::Failure { reason: reason.into() },
        })
    }

    pub fn code(&self) -> Code {
        match self {
            Envelope::DuplicateConnection { .. } => Code::DuplicateConnection,
            Envelope::Message(_)                 => Code::Message,
            Envelope::Response(_)                => Code::Response,
            Envelope::GuildCount                 => Code::GuildCount,
            Envelope::Request(_)                 => Code::Request,
            Envelope::InvalidPayload(_)          => Code::InvalidPayload,
        }
    }

    /// Split into the raw `(code, text)` pair carried on the wire.
    pub fn into_parts(self) -> (Code, String) {
        let code = self.code();
        let text = match self {
            Envelope::DuplicateConnection { notice } => notice,
            Envelope::Message(text) | Envelope::InvalidPayload(text) => text,
            Envelope::Response(reply) => serde_json::to_string(&reply).unwrap_or_default(),
            Envelope::Request(req) => serde_json::to_string(&req).unwrap_or_default(),
            Envelope::GuildCount => String::new(),
        };
        (code, text)
    }

    /// Rebuild a typed envelope from a raw pair, validating the payload.
    pub fn from_parts(code: Code, text: String) -> Result<Self, ProtocolError> {
        let invalid = |reason: String| ProtocolError::InvalidPayload {
            code: code.as_u16(),
            reason,
        };

        Ok(match code {
            Code::DuplicateConnection => Envelope::DuplicateConnection { notice: text },
            Code::Message => Envelope::Message(text),
            Code::InvalidPayload => Envelope::InvalidPayload(text),
            Code::GuildCount => {
                if !text.is_empty() {
                    return Err(invalid("GUILD_COUNT carries no payload".into()));
                }
                Envelope::GuildCount
            }
            Code::Response => {
                Envelope::Response(serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?)
            }
            Code::Request => {
                Envelope::Request(serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?)
            }
        })
    }

    pub fn encode(self) -> Vec<u8> {
        let (code, text) = self.into_parts();
        encode(code, &text)
    }

    /// Encode as a UTF-8 string, ready for a WebSocket text frame.
    pub fn to_text(self) -> String {
        String::from_utf8(self.encode()).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (code, text) = decode(bytes)?;
        Self::from_parts(code, text)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
