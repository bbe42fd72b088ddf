//! Connection monitor — the background task behind `enable_persistence`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connector::login_message;
use crate::identity::ClientIdentity;
use crate::transport::{ConnectionState, Transport, TransportError};

/// Flags shared by the connector, its monitor task, and teardown.  Always
/// accessed under one lock.
#[derive(Default)]
pub(crate) struct SupervisorState {
    pub(crate) monitoring: bool,
    /// Set once, at teardown.  Paired with the connector's cancellation
    /// token, which wakes the monitor immediately.
    pub(crate) destructing: bool,
    /// The socket was (re)opened but the broker has not yet been sent a
    /// login on it.  Cleared only after a login send succeeds.
    pub(crate) needs_login: bool,
    pub(crate) monitor_task: Option<JoinHandle<()>>,
}

pub(crate) struct Monitor {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) identity: Arc<ClientIdentity>,
    pub(crate) state: Arc<Mutex<SupervisorState>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) check_interval: Duration,
    pub(crate) max_connect_attempts: u32,
}

impl Monitor {
    /// Check the connection every interval until teardown or until a
    /// reconnect exhausts its attempts.
    pub(crate) async fn run(self) {
        tracing::info!(
            check_interval_ms = self.check_interval.as_millis() as u64,
            max_connect_attempts = self.max_connect_attempts,
            "connection monitor started"
        );

        loop {
            // A token cancelled before this point is still observed here.
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            if self.state.lock().destructing {
                break;
            }

            let Some(result) = self.check_unless_cancelled().await else {
                break;
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "connection monitor stopping; reconnect failed");
                    self.state.lock().monitoring = false;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection monitor check failed; will retry");
                }
            }
        }

        tracing::info!("stopping connection monitor");
        self.state.lock().monitoring = false;
    }

    /// Run one check unless teardown has been signalled.  Cancellation is
    /// polled first, so no check starts once the token is cancelled.
    async fn check_unless_cancelled(&self) -> Option<Result<(), TransportError>> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            r = self.check_connection() => Some(r),
        }
    }

    async fn check_connection(&self) -> Result<(), TransportError> {
        if self.transport.state() != ConnectionState::Open {
            tracing::warn!("connection to broker lost; reconnecting");
            self.transport.connect(self.max_connect_attempts).await?;
            self.state.lock().needs_login = true;
        }

        // The broker forgets the session with the socket; log in again, and
        // keep retrying on later checks until one send goes through.
        if self.state.lock().needs_login {
            let frame = login_message(&self.identity)
                .and_then(|msg| Ok(msg.serialize()?))
                .map_err(|e| TransportError::Send(format!("cannot build login message: {e}")))?;
            self.transport.send(frame).await?;
            self.state.lock().needs_login = false;
            tracing::info!("sent login after reconnect");
            return Ok(());
        }

        tracing::debug!("sending heartbeat ping");
        self.transport.ping().await
    }
}
