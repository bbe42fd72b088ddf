//! WebSocket transport over mutual TLS.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{ConnectionState, MessageCallback, Transport, TransportError, TransportFactory};
use crate::identity::ClientIdentity;
use crate::reconnect::ReconnectBackoff;
use crate::tls;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// State shared with the reader task.  `generation` increments on every
/// successful open so a reader left over from an earlier socket cannot mark
/// the current one closed.
struct Shared {
    state: ConnectionState,
    generation: u64,
}

/// A broker connection over WebSocket.
///
/// `wss://` URLs use mutual TLS with the identity's CA, certificate, and key;
/// `ws://` URLs are plain text.  Inbound frames are read by a dedicated task
/// that invokes the installed [`MessageCallback`] for each one.
pub struct WsTransport {
    url: String,
    tls: Option<Arc<rustls::ClientConfig>>,
    backoff: ReconnectBackoff,
    shared: Arc<Mutex<Shared>>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    /// Serializes writes so concurrent sends never interleave frames.
    sink: tokio::sync::Mutex<Option<WsSink>>,
    /// Serializes whole connect cycles (caller vs. monitor task).
    connect_lock: tokio::sync::Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(
        url: impl Into<String>,
        identity: &ClientIdentity,
        backoff: ReconnectBackoff,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Config(format!("invalid server url '{url}': {e}")))?;

        let tls = match request.uri().scheme_str() {
            Some("wss") => Some(tls::client_config(identity)?),
            Some("ws") => None,
            other => {
                return Err(TransportError::Config(format!(
                    "unsupported url scheme {other:?} in '{url}'"
                )))
            }
        };

        Ok(Self {
            url,
            tls,
            backoff,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Closed,
                generation: 0,
            })),
            on_message: Arc::new(RwLock::new(None)),
            sink: tokio::sync::Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            reader: Mutex::new(None),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.lock().state = state;
    }

    async fn open_once(&self) -> Result<WsStream, WsError> {
        let connector = self.tls.clone().map(Connector::Rustls);
        let (ws, _response) =
            connect_async_tls_with_config(self.url.as_str(), None, false, connector).await?;
        Ok(ws)
    }

    async fn install(&self, ws: WsStream) {
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);

        let generation = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            shared.state = ConnectionState::Open;
            shared.generation
        };

        let task = tokio::spawn(read_loop(
            stream,
            generation,
            self.shared.clone(),
            self.on_message.clone(),
        ));
        if let Some(previous) = self.reader.lock().replace(task) {
            previous.abort();
        }
    }

    async fn write(&self, frame: Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if let Err(e) = sink.send(frame).await {
            self.set_state(ConnectionState::Closed);
            return Err(TransportError::Send(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, max_attempts: u32) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        let attempts = max_attempts.max(1);
        self.set_state(ConnectionState::Connecting);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            tracing::debug!(url = %self.url, attempt = attempt + 1, "opening connection");
            match self.open_once().await {
                Ok(ws) => {
                    self.install(ws).await;
                    tracing::info!(url = %self.url, "connection established");
                    return Ok(());
                }
                // The broker answered but refused the upgrade; report it as
                // transient instead of spending the remaining attempts.
                Err(WsError::Http(response)) => {
                    self.set_state(ConnectionState::Closed);
                    return Err(TransportError::Processing(format!(
                        "broker rejected the upgrade with status {}",
                        response.status()
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        url = %self.url,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "connection attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff.delay_after(attempt)).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        Err(TransportError::Fatal {
            attempts,
            reason: last_error,
        })
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.write(Message::Binary(frame.to_vec())).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.write(Message::Ping(Vec::new())).await
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    fn set_on_message(&self, callback: MessageCallback) {
        *self.on_message.write() = Some(callback);
    }

    fn reset_callbacks(&self) {
        *self.on_message.write() = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    generation: u64,
    shared: Arc<Mutex<Shared>>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
) {
    while let Some(frame) = stream.next().await {
        let payload = match frame {
            Ok(Message::Binary(data)) => Bytes::from(data),
            Ok(Message::Text(text)) => Bytes::from(text),
            Ok(Message::Close(close)) => {
                tracing::info!(?close, "broker closed connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "connection read failed");
                break;
            }
        };

        // Clone out of the lock so a slow callback never blocks reset_callbacks.
        // A frame read before a concurrent reset still reaches this callback.
        let callback = on_message.read().clone();
        match callback {
            Some(cb) => cb(payload),
            None => tracing::trace!(bytes = payload.len(), "no message callback; frame discarded"),
        }
    }

    let mut shared = shared.lock();
    if shared.generation == generation {
        shared.state = ConnectionState::Closed;
    }
}

/// Creates a [`WsTransport`] per connector.
#[derive(Debug, Clone, Default)]
pub struct WsTransportFactory {
    pub backoff: ReconnectBackoff,
}

impl TransportFactory for WsTransportFactory {
    fn create(
        &self,
        server_url: &str,
        identity: &ClientIdentity,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(WsTransport::new(
            server_url,
            identity,
            self.backoff.clone(),
        )?))
    }
}
