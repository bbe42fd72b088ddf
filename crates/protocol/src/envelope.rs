//! Envelope: the routing header of every message.

use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkDescriptor, MessageChunk};

/// Envelope chunk content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per message (uuid v4).
    pub id: String,
    /// Absolute UTC expiry, ISO-8601 with microseconds.
    pub expires: String,
    /// Client address of the sender (`cth://<cn>/<type>`).
    pub sender: String,
    /// Destination client addresses.
    pub endpoints: Vec<String>,
    /// Name of the schema the data chunk conforms to.
    pub data_schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_report: Option<bool>,
}

impl Envelope {
    /// Build an envelope with a fresh id that expires `timeout_secs` from now.
    pub fn new(
        sender: impl Into<String>,
        endpoints: Vec<String>,
        data_schema: impl Into<String>,
        timeout_secs: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            expires: expiry_timestamp(timeout_secs),
            sender: sender.into(),
            endpoints,
            data_schema: data_schema.into(),
            destination_report: None,
        }
    }

    /// Ask the broker to report which endpoints the message reached.
    pub fn with_destination_report(mut self, report: bool) -> Self {
        self.destination_report = Some(report);
        self
    }

    /// Serialize into an envelope chunk.
    pub fn to_chunk(&self) -> Result<MessageChunk, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(MessageChunk::new(ChunkDescriptor::Envelope, json))
    }
}

/// Data of the login message: the client type announced to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(rename = "type")]
    pub client_type: String,
}

/// `now + timeout_secs` as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn expiry_timestamp(timeout_secs: u32) -> String {
    (Utc::now() + Duration::seconds(i64::from(timeout_secs)))
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}
