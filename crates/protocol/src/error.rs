//! Protocol errors: framing failures and schema validation failures.

/// A raw frame could not be decoded into a [`Message`](crate::Message).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown chunk descriptor 0x{0:02x}")]
    UnknownDescriptor(u8),
    #[error("truncated chunk: {0}")]
    Truncated(String),
    #[error("unexpected chunk: {0}")]
    UnexpectedChunk(String),
    #[error("missing {0} chunk")]
    MissingChunk(&'static str),
    #[error("chunk too large: {0} bytes")]
    ChunkTooLarge(usize),
}

/// A decoded message does not match the registered schemas.
#[derive(thiserror::Error, Debug)]
pub enum ValidatorError {
    #[error("'{0}' is not a registered schema")]
    SchemaNotFound(String),
    #[error("does not match schema '{schema}': {reason}")]
    Validation { schema: String, reason: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}
