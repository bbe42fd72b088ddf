//! Schema registry and chunk validation.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ValidatorError;
use crate::message::Message;
use crate::schema::{ContentType, Schema};
use crate::ENVELOPE_SCHEMA_NAME;

/// Decoded data chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    Json(Value),
    Binary(Bytes),
}

impl ChunkData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ChunkData::Json(v) => Some(v),
            ChunkData::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ChunkData::Json(_) => None,
            ChunkData::Binary(b) => Some(b),
        }
    }
}

/// A validated inbound message, ready for a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunks {
    pub envelope: Envelope,
    pub data: ChunkData,
    /// Debug chunks that decoded to JSON objects, in arrival order.
    pub debug: Vec<Value>,
    /// Debug chunks skipped because they were not JSON objects.
    pub invalid_debug: usize,
}

/// Registry of named schemas.
///
/// Registration replaces any schema of the same name.  Lookups take a read
/// lock only, so validation on the inbound path never contends with other
/// validations.
#[derive(Debug, Default)]
pub struct Validator {
    schemas: RwLock<HashMap<String, Schema>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema`.  Returns `true` if a schema with the same name was
    /// replaced.
    pub fn register_schema(&self, schema: Schema) -> bool {
        let name = schema.name().to_string();
        let replaced = self.schemas.write().insert(name.clone(), schema).is_some();
        if replaced {
            tracing::debug!(schema = %name, "schema redefined");
        }
        replaced
    }

    pub fn includes_schema(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    pub fn content_type(&self, name: &str) -> Result<ContentType, ValidatorError> {
        self.schemas
            .read()
            .get(name)
            .map(Schema::content_type)
            .ok_or_else(|| ValidatorError::SchemaNotFound(name.to_string()))
    }

    /// Validate a JSON document against the schema named `name`.
    pub fn validate(&self, doc: &Value, name: &str) -> Result<(), ValidatorError> {
        let schemas = self.schemas.read();
        let schema = schemas
            .get(name)
            .ok_or_else(|| ValidatorError::SchemaNotFound(name.to_string()))?;
        schema.check(doc).map_err(|reason| ValidatorError::Validation {
            schema: name.to_string(),
            reason,
        })
    }

    /// Validate every chunk of `msg` and decode it.
    ///
    /// The envelope must satisfy the envelope schema.  The data chunk is
    /// parsed and validated when its `data_schema` is a registered JSON
    /// schema; otherwise it is passed through as bytes.
    pub fn validate_and_parse(&self, msg: &Message) -> Result<ParsedChunks, ValidatorError> {
        let envelope_doc: Value = serde_json::from_slice(&msg.envelope().content)?;
        self.validate(&envelope_doc, ENVELOPE_SCHEMA_NAME)?;
        let envelope: Envelope = serde_json::from_value(envelope_doc)?;

        if envelope.endpoints.is_empty() {
            return Err(ValidatorError::Validation {
                schema: ENVELOPE_SCHEMA_NAME.to_string(),
                reason: "endpoints must not be empty".into(),
            });
        }

        let content = msg.data().content.clone();
        let data = match self.content_type(&envelope.data_schema) {
            Ok(ContentType::Json) => {
                let doc: Value = serde_json::from_slice(&content)?;
                self.validate(&doc, &envelope.data_schema)?;
                ChunkData::Json(doc)
            }
            Ok(ContentType::Binary) | Err(ValidatorError::SchemaNotFound(_)) => {
                ChunkData::Binary(content)
            }
            Err(e) => return Err(e),
        };

        let mut debug = Vec::with_capacity(msg.debug().len());
        let mut invalid_debug = 0;
        for chunk in msg.debug() {
            match serde_json::from_slice::<Value>(&chunk.content) {
                Ok(doc) if doc.is_object() => debug.push(doc),
                _ => invalid_debug += 1,
            }
        }
        if invalid_debug > 0 {
            tracing::debug!(
                id = %envelope.id,
                invalid_debug,
                "skipped undecodable debug chunks"
            );
        }

        Ok(ParsedChunks {
            envelope,
            data,
            debug,
            invalid_debug,
        })
    }
}
