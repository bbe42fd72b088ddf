//! Builder pattern for constructing a [`Connector`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::dispatch::DispatchTable;
use crate::error::ConnectorError;
use crate::identity::ClientIdentity;
use crate::monitor::SupervisorState;
use crate::reconnect::ReconnectBackoff;
use crate::transport::{TransportFactory, WsTransportFactory};
use crate::CONNECTION_CHECK_INTERVAL;

/// Fluent builder for [`Connector`].
///
/// # Example
///
/// ```rust,no_run
/// # use cthun_client::ConnectorBuilder;
/// let connector = ConnectorBuilder::new()
///     .server_url("wss://broker.example.com:8090/cthun/")
///     .client_type("agent")
///     .credentials(
///         "/etc/cthun/ssl/ca.pem",
///         "/etc/cthun/ssl/agent01.pem",
///         "/etc/cthun/ssl/agent01.key",
///     )
///     .check_interval(std::time::Duration::from_secs(15))
///     .build()
///     .unwrap();
/// ```
pub struct ConnectorBuilder {
    pub(crate) server_url: String,
    pub(crate) client_type: String,
    pub(crate) ca: PathBuf,
    pub(crate) crt: PathBuf,
    pub(crate) key: PathBuf,
    pub(crate) check_interval: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) transport_factory: Option<Arc<dyn TransportFactory>>,
}

impl ConnectorBuilder {
    pub fn new() -> Self {
        Self {
            server_url: String::new(),
            client_type: "agent".into(),
            ca: PathBuf::new(),
            crt: PathBuf::new(),
            key: PathBuf::new(),
            check_interval: CONNECTION_CHECK_INTERVAL,
            reconnect_backoff: ReconnectBackoff::default(),
            transport_factory: None,
        }
    }

    /// Seed every setting from a loaded config file.
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new()
            .server_url(config.server_url.clone())
            .client_type(config.client_type.clone())
            .credentials(config.ca.clone(), config.crt.clone(), config.key.clone())
            .check_interval(Duration::from_secs(config.check_interval_secs))
            .reconnect_backoff(ReconnectBackoff::from(&config.reconnect))
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Set the broker URL (e.g. `wss://broker.example.com:8090/cthun/`).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the CA certificate, client certificate, and private key paths.
    pub fn credentials(
        self,
        ca: impl Into<PathBuf>,
        crt: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.ca(ca).crt(crt).key(key)
    }

    pub fn ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca = path.into();
        self
    }

    pub fn crt(mut self, path: impl Into<PathBuf>) -> Self {
        self.crt = path.into();
        self
    }

    pub fn key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key = path.into();
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Set the client type announced at login (default `"agent"`).
    pub fn client_type(mut self, t: impl Into<String>) -> Self {
        self.client_type = t.into();
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the monitor's check interval (default 15s).
    pub fn check_interval(mut self, d: Duration) -> Self {
        self.check_interval = d;
        self
    }

    /// Override the delay policy between connect attempts.  Ignored when a
    /// custom transport factory is installed.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Replace the WebSocket transport.
    pub fn transport_factory(self, factory: impl TransportFactory + 'static) -> Self {
        self.transport_factory_arc(Arc::new(factory))
    }

    pub fn transport_factory_arc(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Build the [`Connector`].  Reads the client certificate to derive the
    /// client identity; no connection is opened.
    pub fn build(self) -> Result<Connector, ConnectorError> {
        if self.server_url.is_empty() {
            return Err(ConnectorError::Config("server_url is required".into()));
        }
        if self.client_type.is_empty() {
            return Err(ConnectorError::Config("client_type is required".into()));
        }
        if self.check_interval.is_zero() {
            return Err(ConnectorError::Config(
                "check_interval must be greater than zero".into(),
            ));
        }

        let identity = ClientIdentity::new(self.client_type, self.ca, self.crt, self.key)?;
        let factory = self.transport_factory.unwrap_or_else(|| {
            Arc::new(WsTransportFactory {
                backoff: self.reconnect_backoff,
            })
        });

        Ok(Connector {
            server_url: self.server_url,
            identity: Arc::new(identity),
            factory,
            dispatch: Arc::new(DispatchTable::new()),
            transport: Mutex::new(None),
            state: Arc::new(Mutex::new(SupervisorState::default())),
            shutdown: CancellationToken::new(),
            check_interval: self.check_interval,
        })
    }
}

impl Default for ConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
