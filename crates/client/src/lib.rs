//! `cthun-client` — connection supervisor and message dispatch for Cthun
//! clients.
//!
//! A client holds one persistent, TLS-secured WebSocket connection to a Cthun
//! broker.  It logs in, sends application payloads wrapped in envelopes, and
//! routes inbound messages to handlers keyed by `data_schema`.
//!
//! # Usage
//!
//! ```text
//! let connector = Connector::new(
//!     "wss://broker:8090/cthun/", "agent",
//!     "ca.pem", "agent01.pem", "agent01.key",
//! )?;
//!
//! let mut schema = Schema::new("example/v1", ContentType::Json);
//! schema.add_constraint("x", TypeConstraint::Int, true);
//! connector.register_message_callback(schema, |chunks: &ParsedChunks| { .. });
//!
//! connector.connect(3).await?;            // open + login
//! connector.enable_persistence(5)?;       // heartbeat + reconnect
//! connector.send(&["cth://server"], "example/v1", 10, &json!({"x": 1}), &[]).await?;
//!
//! connector.shutdown().await;
//! ```
//!
//! # Lifecycle (hard-coded by the connector)
//!
//! 1. `connect`: create the transport on first use, install the inbound
//!    callback, open with bounded attempts, send the login message
//! 2. Inbound: parse → validate → dispatch to the handler for `data_schema`;
//!    malformed or invalid frames are dropped and counted, never surfaced
//! 3. `enable_persistence`: every check interval, ping if open, reconnect if
//!    not; stop on exhausted reconnect attempts
//! 4. Teardown: detach callbacks, signal the monitor task, join it

pub mod builder;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod identity;
mod monitor;
pub mod reconnect;
pub mod tls;
pub mod transport;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ConnectorBuilder;
pub use config::{ConnectorConfig, ReconnectConfig};
pub use connector::Connector;
pub use dispatch::{DispatchCounters, DispatchOutcome, DispatchTable, MessageHandler};
pub use error::ConnectorError;
pub use identity::ClientIdentity;
pub use reconnect::ReconnectBackoff;
pub use transport::{
    ConnectionState, MessageCallback, Transport, TransportError, TransportFactory, WsTransport,
    WsTransportFactory,
};

// Re-export protocol types so clients never need to import cthun-protocol directly.
pub use cthun_protocol::{
    ChunkData, ContentType, Envelope, Message, MessageChunk, ParsedChunks, Schema,
    TypeConstraint,
};

/// Interval between connection checks of the monitor task.
pub const CONNECTION_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
