//! Top-level client error.

use crate::transport::TransportError;

/// Errors surfaced to callers of [`Connector`](crate::Connector).
///
/// The monitor task and the inbound dispatch path never produce these; their
/// failures are logged (and, for dispatch, counted) instead.
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    /// Bad credentials, bad server address, or exhausted connect attempts.
    #[error("config: {0}")]
    Config(String),
    /// `send` or `enable_persistence` called before `connect`.
    #[error("connection not initialized")]
    NotInitialized,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("message: {0}")]
    Message(#[from] cthun_protocol::MessageError),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}
