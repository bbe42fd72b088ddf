//! Connection supervisor — owns the broker connection, the dispatch table,
//! and the monitor task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cthun_protocol::{
    ChunkDescriptor, Envelope, LoginData, Message, MessageChunk, Schema,
    DEFAULT_MSG_TIMEOUT_SECS, LOGIN_SCHEMA_NAME, SERVER_ENDPOINT,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchCounters, DispatchTable, MessageHandler};
use crate::error::ConnectorError;
use crate::identity::ClientIdentity;
use crate::monitor::{Monitor, SupervisorState};
use crate::transport::{ConnectionState, Transport, TransportFactory};

/// A Cthun client connection.
///
/// Create via [`Connector::new`] or [`ConnectorBuilder`](crate::ConnectorBuilder).
/// All methods take `&self`; wrap the connector in an `Arc` to share it.
///
/// Dropping the connector detaches the transport callbacks and signals the
/// monitor task, which exits at its next wake-up.  Call
/// [`shutdown`](Self::shutdown) to also wait for it.
pub struct Connector {
    pub(crate) server_url: String,
    pub(crate) identity: Arc<ClientIdentity>,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) dispatch: Arc<DispatchTable>,
    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,
    pub(crate) state: Arc<Mutex<SupervisorState>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) check_interval: Duration,
}

impl Connector {
    /// Build a connector with the default WebSocket transport.
    ///
    /// Reads `crt` to derive the client identity; fails with
    /// [`ConnectorError::Config`] if it cannot.
    pub fn new(
        server_url: impl Into<String>,
        client_type: impl Into<String>,
        ca: impl Into<PathBuf>,
        crt: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Self, ConnectorError> {
        Self::builder()
            .server_url(server_url)
            .client_type(client_type)
            .credentials(ca, crt, key)
            .build()
    }

    /// Start a new builder.
    pub fn builder() -> crate::builder::ConnectorBuilder {
        crate::builder::ConnectorBuilder::new()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register `schema` and route inbound messages whose `data_schema` is
    /// `schema.name()` to `handler`.  Registering a name again replaces the
    /// earlier schema and handler.
    pub fn register_message_callback<H: MessageHandler>(&self, schema: Schema, handler: H) {
        self.dispatch.register(schema, handler);
    }

    /// Counters of inbound messages by outcome.
    pub fn dispatch_stats(&self) -> DispatchCounters {
        self.dispatch.counters()
    }

    // ── Connection state ─────────────────────────────────────────────

    /// Open the connection and log in.
    ///
    /// The transport is created on the first call.  Every failure, including
    /// exhausting `max_connect_attempts`, is reported as
    /// [`ConnectorError::Config`]; this call does not retry beyond the
    /// transport's own attempts.
    pub async fn connect(&self, max_connect_attempts: u32) -> Result<(), ConnectorError> {
        let transport = self.init_transport()?;

        let result = match transport.connect(max_connect_attempts).await {
            Ok(()) => self.send_login(transport.as_ref()).await,
            Err(e) => Err(e.into()),
        };

        result.map_err(|e| {
            tracing::error!(url = %self.server_url, error = %e, "failed to connect");
            match e {
                ConnectorError::Transport(e) => ConnectorError::Config(e.to_string()),
                other => other,
            }
        })
    }

    /// Whether the transport exists and reports an open connection.
    ///
    /// This does not wait for the broker to acknowledge the login.
    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .as_ref()
            .is_some_and(|t| t.state() == ConnectionState::Open)
    }

    /// Start the monitor task: heartbeat while open, reconnect (up to
    /// `max_connect_attempts` per check) while not.
    ///
    /// A no-op if a monitor task is already running.  The task stops by
    /// itself when a reconnect exhausts its attempts; call this again to
    /// restart it.  Must be called from within a Tokio runtime.
    pub fn enable_persistence(&self, max_connect_attempts: u32) -> Result<(), ConnectorError> {
        let transport = self.current_transport()?;

        let mut state = self.state.lock();
        if state.monitoring {
            tracing::warn!("the monitoring task that enables persistence is already running");
            return Ok(());
        }

        if state.monitor_task.take().is_some() {
            tracing::debug!("released the handle of a finished monitoring task");
        }

        let monitor = Monitor {
            transport,
            identity: self.identity.clone(),
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            check_interval: self.check_interval,
            max_connect_attempts,
        };
        state.monitoring = true;
        state.monitor_task = Some(tokio::spawn(monitor.run()));
        Ok(())
    }

    /// Whether the monitor task is running.
    pub fn is_monitoring(&self) -> bool {
        self.state.lock().monitoring
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Build an envelope chunk sent by this client, expiring `timeout_secs`
    /// from now.  Fails with [`ConnectorError::Config`] if `endpoints` is
    /// empty.
    pub fn create_envelope<S: AsRef<str>>(
        &self,
        endpoints: &[S],
        data_schema: &str,
        timeout_secs: u32,
    ) -> Result<MessageChunk, ConnectorError> {
        if endpoints.is_empty() {
            return Err(ConnectorError::Config(
                "a message needs at least one endpoint".into(),
            ));
        }
        let endpoints: Vec<String> = endpoints.iter().map(|e| e.as_ref().to_string()).collect();
        let envelope = Envelope::new(self.identity.id.clone(), endpoints, data_schema, timeout_secs);
        tracing::debug!(
            id = %envelope.id,
            receivers = envelope.endpoints.len(),
            data_schema = %data_schema,
            "creating message"
        );
        Ok(envelope.to_chunk()?)
    }

    /// Send a JSON payload.
    pub async fn send<S: AsRef<str>>(
        &self,
        endpoints: &[S],
        data_schema: &str,
        timeout_secs: u32,
        data: &Value,
        debug: &[Value],
    ) -> Result<(), ConnectorError> {
        let data = serde_json::to_vec(data)?;
        self.send_chunks(endpoints, data_schema, timeout_secs, Bytes::from(data), debug)
            .await
    }

    /// Send an opaque binary payload.
    pub async fn send_binary<S: AsRef<str>>(
        &self,
        endpoints: &[S],
        data_schema: &str,
        timeout_secs: u32,
        data: &[u8],
        debug: &[Value],
    ) -> Result<(), ConnectorError> {
        self.send_chunks(
            endpoints,
            data_schema,
            timeout_secs,
            Bytes::copy_from_slice(data),
            debug,
        )
        .await
    }

    /// Serialize and write a prepared message.
    pub async fn send_message(&self, msg: &Message) -> Result<(), ConnectorError> {
        let transport = self.current_transport()?;
        let frame = msg.serialize()?;
        tracing::trace!(bytes = frame.len(), "sending message");
        transport.send(frame).await?;
        Ok(())
    }

    /// Detach callbacks, stop the monitor task, and wait for it to finish.
    pub async fn shutdown(self) {
        if let Some(task) = self.begin_teardown() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "monitoring task ended abnormally");
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn send_chunks<S: AsRef<str>>(
        &self,
        endpoints: &[S],
        data_schema: &str,
        timeout_secs: u32,
        data: Bytes,
        debug: &[Value],
    ) -> Result<(), ConnectorError> {
        self.current_transport()?;

        let envelope = self.create_envelope(endpoints, data_schema, timeout_secs)?;
        let debug = debug
            .iter()
            .map(|d| serde_json::to_vec(d).map(|json| MessageChunk::new(ChunkDescriptor::Debug, json)))
            .collect::<Result<Vec<_>, _>>()?;

        let msg = Message::new(envelope, MessageChunk::new(ChunkDescriptor::Data, data))?
            .with_debug(debug)?;
        self.send_message(&msg).await
    }

    async fn send_login(&self, transport: &dyn Transport) -> Result<(), ConnectorError> {
        self.state.lock().needs_login = true;
        let msg = login_message(&self.identity)?;
        tracing::info!(id = %self.identity.id, "sending login message");
        transport.send(msg.serialize()?).await?;
        self.state.lock().needs_login = false;
        Ok(())
    }

    fn current_transport(&self) -> Result<Arc<dyn Transport>, ConnectorError> {
        self.transport
            .lock()
            .clone()
            .ok_or(ConnectorError::NotInitialized)
    }

    fn init_transport(&self) -> Result<Arc<dyn Transport>, ConnectorError> {
        let mut slot = self.transport.lock();
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.clone());
        }

        let transport = self
            .factory
            .create(&self.server_url, &self.identity)
            .map_err(|e| ConnectorError::Config(e.to_string()))?;

        let dispatch = self.dispatch.clone();
        transport.set_on_message(Arc::new(move |raw| {
            dispatch.process_message(raw);
        }));

        *slot = Some(transport.clone());
        Ok(transport)
    }

    /// Teardown order: callbacks first, so no inbound frame reaches the
    /// dispatch table once shutdown starts; then the signal; then the handle.
    fn begin_teardown(&self) -> Option<tokio::task::JoinHandle<()>> {
        if let Some(transport) = self.transport.lock().as_ref() {
            tracing::debug!("resetting transport callbacks");
            transport.reset_callbacks();
        }

        let mut state = self.state.lock();
        state.destructing = true;
        self.shutdown.cancel();
        state.monitor_task.take()
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        // Cannot await here; the detached task observes the cancellation.
        let _ = self.begin_teardown();
    }
}

/// The login message: addressed to the broker, carrying the client type.
pub(crate) fn login_message(identity: &ClientIdentity) -> Result<Message, ConnectorError> {
    let envelope = Envelope::new(
        identity.id.clone(),
        vec![SERVER_ENDPOINT.to_string()],
        LOGIN_SCHEMA_NAME,
        DEFAULT_MSG_TIMEOUT_SECS,
    );
    let data = LoginData {
        client_type: identity.client_type.clone(),
    };
    Ok(Message::new(
        envelope.to_chunk()?,
        MessageChunk::new(ChunkDescriptor::Data, serde_json::to_vec(&data)?),
    )?)
}
