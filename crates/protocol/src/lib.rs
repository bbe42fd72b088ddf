//! Cthun wire protocol: chunked messages, envelopes, schemas, and validation.
//!
//! A Cthun message is a version byte followed by typed chunks:
//!
//! ```text
//! ┌─────────┬──────────────────────┬──────────────────┬──────────────────────┐
//! │ version │ ENVELOPE chunk       │ DATA chunk       │ DEBUG chunk (0..n)   │
//! │  u8 = 1 │ desc | size | json   │ desc | size | .. │ desc | size | json   │
//! └─────────┴──────────────────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! This crate does no I/O.  It builds and parses messages, and validates
//! parsed chunks against registered [`Schema`]s so the client can route them
//! by `data_schema`.

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod message;
pub mod schema;
pub mod validator;

pub use chunk::{ChunkDescriptor, MessageChunk};
pub use envelope::{expiry_timestamp, Envelope, LoginData};
pub use error::{MessageError, ValidatorError};
pub use message::Message;
pub use schema::{ContentType, Schema, TypeConstraint};
pub use validator::{ChunkData, ParsedChunks, Validator};

/// Version byte written at the start of every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Name of the schema every inbound envelope is validated against.
pub const ENVELOPE_SCHEMA_NAME: &str = "envelope_schema";

/// Data schema of the login message sent right after the socket opens.
pub const LOGIN_SCHEMA_NAME: &str = "http://puppetlabs.com/loginschema";

/// Endpoint addressing the broker itself.
pub const SERVER_ENDPOINT: &str = "cth://server";

/// URI scheme of client addresses (`cth://<common name>/<type>`).
pub const CLIENT_URI_SCHEME: &str = "cth";

/// Timeout applied to the login message, in seconds.
pub const DEFAULT_MSG_TIMEOUT_SECS: u32 = 10;

/// Build the envelope schema: the mandatory and optional fields of every
/// envelope chunk.
pub fn envelope_schema() -> Schema {
    let mut schema = Schema::new(ENVELOPE_SCHEMA_NAME, ContentType::Json);
    schema
        .add_constraint("id", TypeConstraint::String, true)
        .add_constraint("expires", TypeConstraint::String, true)
        .add_constraint("sender", TypeConstraint::String, true)
        .add_constraint("endpoints", TypeConstraint::Array, true)
        .add_constraint("data_schema", TypeConstraint::String, true)
        .add_constraint("destination_report", TypeConstraint::Bool, false);
    schema
}
