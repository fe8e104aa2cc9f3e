//! # garven-cluster
//!
//! Control-plane core of the Garven hub: every bot cluster keeps one
//! WebSocket open to the hub, and the hub uses those sockets to ask clusters
//! for data.
//!
//! - [`protocol`]: the `{code, text}` envelope and its typed payloads
//! - [`Handshake`]: identify packet validation and admission
//! - [`ConnectionRegistry`]: one live connection per cluster identifier
//! - [`ClusterHub`]: owns the registry; receive loop, broadcast, disconnect
//! - [`ClusterHub::request_all`]: scatter/gather with per-peer deadlines
//! - [`ClusterHub::request`]: targeted request to one cluster
//! - [`aggregate`]: statistics with the partial-response rule
//!
//! ## Design principles
//!
//! - **Evict old, admit new**: a second connection under an identifier
//!   replaces the first, which is told why and then closed.
//! - **Per-peer isolation**: a slow or dead cluster only ever affects its own
//!   entry in a scatter/gather result.
//! - **No leaked entries**: every path that observes a dead socket removes
//!   that exact session from the registry.
//! - **Volatile**: nothing survives a hub restart; clusters re-identify.

pub mod aggregate;
pub mod connection;
pub mod error;
pub mod gather;
pub mod hub;
pub mod identify;
pub mod protocol;
pub mod registry;
mod target;

pub use connection::{ClusterConnection, ConnectionState, Inbound, Outbound};
pub use error::{IdentifyError, ProtocolError, RequestError};
pub use gather::{Outcome, Outcomes};
pub use hub::{ClusterHub, HubConfig};
pub use identify::{Frame, Handshake, IdentifyConfig, IdentifyPacket};
pub use protocol::{Code, Envelope};
pub use registry::ConnectionRegistry;
