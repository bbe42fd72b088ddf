//! Dispatch table — maps data schema names to handlers and validates every
//! inbound message before routing it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cthun_protocol::{envelope_schema, Message, ParsedChunks, Schema, Validator};
use parking_lot::RwLock;

/// Implement this trait to handle inbound messages of one data schema.
///
/// Handlers run synchronously on the transport's delivery task: while one
/// runs, no further inbound message is processed on that connection.  Hand
/// long work off to a task of your own.
///
/// Any `Fn(&ParsedChunks) + Send + Sync + 'static` closure is a handler.
///
/// # Example
///
/// ```rust
/// use cthun_client::{MessageHandler, ParsedChunks};
///
/// struct LogSender;
///
/// impl MessageHandler for LogSender {
///     fn handle(&self, chunks: &ParsedChunks) {
///         println!("message from {}", chunks.envelope.sender);
///     }
/// }
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, chunks: &ParsedChunks);
}

impl<F> MessageHandler for F
where
    F: Fn(&ParsedChunks) + Send + Sync + 'static,
{
    fn handle(&self, chunks: &ParsedChunks) {
        self(chunks)
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Delivered,
    /// The frame did not decode into a message.
    Malformed,
    /// The message failed schema validation.
    Invalid,
    /// No handler is registered for the message's data schema.
    Unhandled,
    /// The handler panicked; the panic was contained.
    HandlerPanicked,
}

/// Snapshot of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub delivered: u64,
    pub malformed: u64,
    pub invalid: u64,
    pub unhandled: u64,
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
struct DispatchStats {
    delivered: AtomicU64,
    malformed: AtomicU64,
    invalid: AtomicU64,
    unhandled: AtomicU64,
    handler_panics: AtomicU64,
}

impl DispatchStats {
    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::Malformed => &self.malformed,
            DispatchOutcome::Invalid => &self.invalid,
            DispatchOutcome::Unhandled => &self.unhandled,
            DispatchOutcome::HandlerPanicked => &self.handler_panics,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Schema registry plus schema name → handler mapping.
///
/// Registration is append-only; registering a name again replaces both its
/// schema and its handler.  Lookups take a read lock, so registering after
/// `connect` is safe.
pub struct DispatchTable {
    validator: Validator,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    stats: DispatchStats,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    /// Create a table with the envelope schema already registered.
    pub fn new() -> Self {
        let validator = Validator::new();
        validator.register_schema(envelope_schema());
        Self {
            validator,
            handlers: RwLock::new(HashMap::new()),
            stats: DispatchStats::default(),
        }
    }

    /// Register `schema` with the validator and route its messages to
    /// `handler`.
    pub fn register<H: MessageHandler>(&self, schema: Schema, handler: H) {
        self.register_arc(schema, Arc::new(handler));
    }

    /// Register a pre-wrapped handler.
    pub fn register_arc(&self, schema: Schema, handler: Arc<dyn MessageHandler>) {
        let name = schema.name().to_string();
        self.validator.register_schema(schema);
        if self.handlers.write().insert(name.clone(), handler).is_some() {
            tracing::debug!(schema = %name, "message handler replaced");
        }
    }

    /// Data schema names that have a handler (sorted).
    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn counters(&self) -> DispatchCounters {
        self.stats.snapshot()
    }

    /// Parse, validate, and route one raw inbound frame.
    ///
    /// Never fails: malformed, invalid, and unhandled frames are logged,
    /// counted, and dropped.
    pub fn process_message(&self, raw: Bytes) -> DispatchOutcome {
        let outcome = self.route(raw);
        self.stats.record(outcome);
        outcome
    }

    fn route(&self, raw: Bytes) -> DispatchOutcome {
        tracing::trace!(bytes = raw.len(), "received message");

        let msg = match Message::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "failed to deserialize message");
                return DispatchOutcome::Malformed;
            }
        };

        let chunks = match self.validator.validate_and_parse(&msg) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(error = %e, "invalid message");
                return DispatchOutcome::Invalid;
            }
        };

        let schema = chunks.envelope.data_schema.as_str();
        let Some(handler) = self.handlers.read().get(schema).cloned() else {
            tracing::warn!(
                schema = %schema,
                id = %chunks.envelope.id,
                "no message handler registered for schema"
            );
            return DispatchOutcome::Unhandled;
        };

        tracing::trace!(schema = %schema, id = %chunks.envelope.id, "executing message handler");

        // catch_unwind: a panicking handler must not take down the reader.
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&chunks))) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(_panic) => {
                tracing::error!(
                    schema = %schema,
                    id = %chunks.envelope.id,
                    "message handler panicked"
                );
                DispatchOutcome::HandlerPanicked
            }
        }
    }
}
