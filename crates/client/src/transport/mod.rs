//! Transport layer: the persistent, message-framed connection to the broker.
//!
//! The connector only talks to [`Transport`].  [`WsTransport`] is the
//! production implementation (WebSocket over mutual TLS); tests substitute a
//! scripted one through [`TransportFactory`].

mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::identity::ClientIdentity;

pub use websocket::{WsTransport, WsTransportFactory};

/// Callback invoked with every raw inbound frame, on the transport's delivery
/// task.  Frames are delivered one at a time, in order.
pub type MessageCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Errors a transport can return.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Unusable server address or TLS material.  Retrying will not help.
    #[error("transport configuration: {0}")]
    Config(String),

    /// A connect attempt failed but the attempt budget is not exhausted.
    #[error("connection processing failure: {0}")]
    Processing(String),

    /// Every allowed connect attempt failed.
    #[error("connection failed after {attempts} attempts: {reason}")]
    Fatal { attempts: u32, reason: String },

    #[error("connection is not open")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Whether the error means the attempt budget is spent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal { .. })
    }
}

/// The connection contract the connector relies on.
///
/// Implementations must allow `send` to run concurrently with inbound
/// delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection, trying up to `max_attempts` times.  A no-op when
    /// already open.  Exhausting the attempts yields [`TransportError::Fatal`].
    async fn connect(&self, max_attempts: u32) -> Result<(), TransportError>;

    /// Write one binary frame.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a heartbeat ping.
    async fn ping(&self) -> Result<(), TransportError>;

    fn state(&self) -> ConnectionState;

    /// Install the inbound-frame callback, replacing any previous one.
    fn set_on_message(&self, callback: MessageCallback);

    /// Detach all callbacks.  Frames arriving afterwards are discarded.
    ///
    /// A frame the reader had already taken off the socket when this is
    /// called may still be delivered once to the previous callback; callers
    /// must not assume delivery stops before this returns.
    fn reset_callbacks(&self);
}

/// Creates the transport lazily, on the connector's first `connect`.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        server_url: &str,
        identity: &ClientIdentity,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
