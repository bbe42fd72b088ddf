//! Integration test: drives a real [`Connector`] over a scripted in-memory
//! transport and asserts the supervisor behaviour end to end:
//! - `connect` opens the transport and sends the login message
//! - `send` frames envelope + data addressed as requested
//! - inbound frames reach the handler registered for their schema
//! - the monitor pings while open, reconnects (and logs in again) while not,
//!   and stops for good when a reconnect exhausts its attempts
//! - teardown detaches callbacks and stops the monitor promptly

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cthun_client::{
    ChunkData, ConnectionState, Connector, ConnectorBuilder, ConnectorError, ContentType,
    Envelope, Message, MessageCallback, ParsedChunks, Schema, Transport, TransportError,
    TransportFactory, TypeConstraint,
};
use cthun_protocol::{ChunkDescriptor, MessageChunk, LOGIN_SCHEMA_NAME, SERVER_ENDPOINT};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair};
use serde_json::json;

// ── Scripted transport ──────────────────────────────────────────────────

/// Records every call; `connect` results are taken from a script and
/// default to success once the script runs out.
struct MockTransport {
    state: Mutex<ConnectionState>,
    connect_script: Mutex<VecDeque<Result<(), TransportError>>>,
    connects: AtomicUsize,
    pings: AtomicUsize,
    resets: AtomicUsize,
    /// Number of upcoming sends to fail.
    failing_sends: AtomicUsize,
    sent: Mutex<Vec<Bytes>>,
    on_message: Mutex<Option<MessageCallback>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Closed),
            connect_script: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            failing_sends: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            on_message: Mutex::new(None),
        })
    }

    fn script_connect(&self, result: Result<(), TransportError>) {
        self.connect_script.lock().push_back(result);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .iter()
            .map(|frame| Message::parse(frame.clone()).unwrap())
            .collect()
    }

    /// Push a frame through the installed callback, as the reader task would.
    fn deliver(&self, frame: Bytes) {
        let callback = self.on_message.lock().clone();
        if let Some(cb) = callback {
            cb(frame);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, max_attempts: u32) -> Result<(), TransportError> {
        assert!(max_attempts > 0);
        self.connects.fetch_add(1, Ordering::SeqCst);
        let result = self.connect_script.lock().pop_front().unwrap_or(Ok(()));
        match &result {
            Ok(()) => self.set_state(ConnectionState::Open),
            Err(_) => self.set_state(ConnectionState::Closed),
        }
        result
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if *self.state.lock() != ConnectionState::Open {
            return Err(TransportError::NotConnected);
        }
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Send("broken pipe".into()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_on_message(&self, callback: MessageCallback) {
        *self.on_message.lock() = Some(callback);
    }

    fn reset_callbacks(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        *self.on_message.lock() = None;
    }
}

struct MockFactory(Arc<MockTransport>);

impl TransportFactory for MockFactory {
    fn create(
        &self,
        _server_url: &str,
        _identity: &cthun_client::ClientIdentity,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport: Arc<dyn Transport> = self.0.clone();
        Ok(transport)
    }
}

struct BrokenFactory;

impl TransportFactory for BrokenFactory {
    fn create(
        &self,
        server_url: &str,
        _identity: &cthun_client::ClientIdentity,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Err(TransportError::Config(format!("cannot use '{server_url}'")))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn write_cert(dir: &Path) -> std::path::PathBuf {
    let mut params = CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, "agent01");
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    let path = dir.join("agent01.pem");
    std::fs::write(&path, cert.pem()).unwrap();
    path
}

fn builder(dir: &Path, check_interval: Duration) -> ConnectorBuilder {
    let crt = write_cert(dir);
    ConnectorBuilder::new()
        .server_url("wss://broker.test:8090/cthun/")
        .client_type("agent")
        .credentials(&crt, &crt, dir.join("agent01.key"))
        .check_interval(check_interval)
}

fn connector(dir: &Path, mock: &Arc<MockTransport>) -> Connector {
    builder(dir, Duration::from_millis(20))
        .transport_factory(MockFactory(mock.clone()))
        .build()
        .unwrap()
}

fn envelope_of(msg: &Message) -> Envelope {
    serde_json::from_slice(&msg.envelope().content).unwrap()
}

fn example_schema() -> Schema {
    let mut schema = Schema::new("example/v1", ContentType::Json);
    schema.add_constraint("x", TypeConstraint::Int, true);
    schema
}

fn inbound_frame(data_schema: &str, data: serde_json::Value) -> Bytes {
    let envelope = json!({
        "id": "4a1e8f56-2b7c-4d3e-9f10-5c6d7e8f9a0b",
        "expires": "2026-10-16T09:00:10.000000Z",
        "sender": "cth://controller01/controller",
        "endpoints": ["cth://agent01/agent"],
        "data_schema": data_schema,
    });
    Message::new(
        MessageChunk::new(ChunkDescriptor::Envelope, envelope.to_string()),
        MessageChunk::new(ChunkDescriptor::Data, data.to_string()),
    )
    .unwrap()
    .serialize()
    .unwrap()
}

/// Poll `cond` every few milliseconds for up to two seconds.
async fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ── Connect and send ────────────────────────────────────────────────────

#[tokio::test]
async fn send_before_connect_is_not_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);

    let err = connector
        .send(&["cth://server"], "example/v1", 10, &json!({"x": 1}), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::NotInitialized));

    let err = connector.enable_persistence(2).unwrap_err();
    assert!(matches!(err, ConnectorError::NotInitialized));

    assert!(mock.sent.lock().is_empty());
    assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    assert!(!connector.is_connected());
}

#[tokio::test]
async fn send_without_endpoints_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();

    let no_endpoints: [&str; 0] = [];
    let err = connector
        .send(&no_endpoints, "example/v1", 10, &json!({"x": 1}), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Config(_)));
    assert!(connector.create_envelope(&no_endpoints, "example/v1", 10).is_err());

    // Only the login went out.
    assert_eq!(mock.sent.lock().len(), 1);
}

#[tokio::test]
async fn connect_sends_login() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);

    connector.connect(2).await.unwrap();
    assert!(connector.is_connected());

    let sent = mock.sent();
    assert_eq!(sent.len(), 1);
    let envelope = envelope_of(&sent[0]);
    assert_eq!(envelope.sender, "cth://agent01/agent");
    assert_eq!(envelope.endpoints, vec![SERVER_ENDPOINT]);
    assert_eq!(envelope.data_schema, LOGIN_SCHEMA_NAME);

    let data: serde_json::Value = serde_json::from_slice(&sent[0].data().content).unwrap();
    assert_eq!(data, json!({"type": "agent"}));
}

#[tokio::test]
async fn send_frames_envelope_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();

    connector
        .send(
            &["cth://server"],
            "example/v1",
            10,
            &json!({"x": 1}),
            &[json!({"hops": []})],
        )
        .await
        .unwrap();

    let sent = mock.sent();
    assert_eq!(sent.len(), 2);
    let msg = &sent[1];
    let envelope = envelope_of(msg);
    assert_eq!(envelope.endpoints, vec!["cth://server"]);
    assert_eq!(envelope.data_schema, "example/v1");
    assert_eq!(envelope.sender, "cth://agent01/agent");
    assert!(envelope.expires.ends_with('Z'));
    assert_ne!(envelope.id, envelope_of(&sent[0]).id);

    let data: serde_json::Value = serde_json::from_slice(&msg.data().content).unwrap();
    assert_eq!(data, json!({"x": 1}));
    assert_eq!(msg.debug().len(), 1);
}

#[tokio::test]
async fn send_binary_keeps_payload_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(1).await.unwrap();

    connector
        .send_binary(&["cth://agent02/agent"], "blob/v1", 10, &[0, 159, 146, 150], &[])
        .await
        .unwrap();

    let sent = mock.sent();
    assert_eq!(&sent[1].data().content[..], &[0, 159, 146, 150]);
}

#[tokio::test]
async fn exhausted_connect_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    mock.script_connect(Err(TransportError::Fatal {
        attempts: 2,
        reason: "connection refused".into(),
    }));
    let connector = connector(dir.path(), &mock);

    let err = connector.connect(2).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Config(_)));
    assert!(!connector.is_connected());
    assert!(mock.sent.lock().is_empty());
}

#[tokio::test]
async fn transport_creation_failure_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let connector = builder(dir.path(), Duration::from_millis(20))
        .transport_factory(BrokenFactory)
        .build()
        .unwrap();

    let err = connector.connect(2).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Config(_)));
    assert!(!connector.is_connected());
}

// ── Inbound dispatch ────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_message_reaches_handler() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);

    let seen: Arc<Mutex<Vec<ParsedChunks>>> = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    connector.register_message_callback(example_schema(), move |chunks: &ParsedChunks| {
        s.lock().push(chunks.clone());
    });
    connector.connect(2).await.unwrap();

    mock.deliver(inbound_frame("example/v1", json!({"x": 1})));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].envelope.id, "4a1e8f56-2b7c-4d3e-9f10-5c6d7e8f9a0b");
    assert_eq!(seen[0].envelope.sender, "cth://controller01/controller");
    assert_eq!(seen[0].data, ChunkData::Json(json!({"x": 1})));
    assert_eq!(connector.dispatch_stats().delivered, 1);
}

#[tokio::test]
async fn bad_inbound_frames_are_counted_and_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    connector.register_message_callback(example_schema(), move |_: &ParsedChunks| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    connector.connect(2).await.unwrap();

    mock.deliver(Bytes::from_static(b"\x02garbage"));
    mock.deliver(inbound_frame("example/v1", json!({"x": "one"})));
    mock.deliver(inbound_frame("unknown/v1", json!({})));

    let stats = connector.dispatch_stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.invalid, 1);
    assert_eq!(stats.unhandled, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(connector.is_connected());
    assert_eq!(mock.sent.lock().len(), 1);
}

// ── Monitor ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn monitor_pings_while_open() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();

    connector.enable_persistence(2).unwrap();
    // A second call while the task runs is a no-op.
    connector.enable_persistence(2).unwrap();
    assert!(connector.is_monitoring());

    assert!(wait_until(|| mock.pings.load(Ordering::SeqCst) >= 3).await);
    assert_eq!(mock.connects.load(Ordering::SeqCst), 1);

    connector.shutdown().await;
}

#[tokio::test]
async fn monitor_reconnects_and_logs_in_again() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();
    connector.enable_persistence(2).unwrap();

    // Broker dropped us; the first reconnect is refused transiently.
    mock.script_connect(Err(TransportError::Processing("503".into())));
    mock.set_state(ConnectionState::Closed);
    assert!(!connector.is_connected());

    assert!(wait_until(|| mock.sent.lock().len() == 2).await);
    assert!(connector.is_connected());
    assert!(connector.is_monitoring());
    assert!(mock.connects.load(Ordering::SeqCst) >= 3);

    let relogin = &mock.sent()[1];
    assert_eq!(envelope_of(relogin).data_schema, LOGIN_SCHEMA_NAME);

    connector.shutdown().await;
}

#[tokio::test]
async fn exhausted_reconnect_stops_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(1).await.unwrap();

    mock.script_connect(Err(TransportError::Fatal {
        attempts: 1,
        reason: "connection refused".into(),
    }));
    mock.set_state(ConnectionState::Closed);
    connector.enable_persistence(1).unwrap();

    assert!(wait_until(|| !connector.is_monitoring()).await);
    assert!(!connector.is_connected());
    assert_eq!(mock.connects.load(Ordering::SeqCst), 2);

    // No further attempts once stopped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.connects.load(Ordering::SeqCst), 2);

    // Enabling again starts a fresh monitor, which reconnects.
    connector.enable_persistence(1).unwrap();
    assert!(connector.is_monitoring());
    assert!(wait_until(|| connector.is_connected()).await);
    assert!(wait_until(|| mock.sent.lock().len() == 2).await);

    connector.shutdown().await;
}

#[tokio::test]
async fn failed_relogin_is_retried_on_next_check() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();
    connector.enable_persistence(2).unwrap();

    // Reconnect succeeds, but the first login on the new socket is lost.
    mock.failing_sends.store(1, Ordering::SeqCst);
    mock.set_state(ConnectionState::Closed);

    assert!(wait_until(|| mock.sent.lock().len() == 2).await);
    assert_eq!(mock.failing_sends.load(Ordering::SeqCst), 0);
    assert_eq!(mock.connects.load(Ordering::SeqCst), 2);
    assert_eq!(envelope_of(&mock.sent()[1]).data_schema, LOGIN_SCHEMA_NAME);

    // Once logged in, the monitor goes back to heartbeats.
    let pings = mock.pings.load(Ordering::SeqCst);
    assert!(wait_until(|| mock.pings.load(Ordering::SeqCst) > pings).await);
    assert_eq!(mock.sent.lock().len(), 2);

    connector.shutdown().await;
}

// ── Teardown ────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropping_connector_stops_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);
    connector.connect(2).await.unwrap();
    connector.enable_persistence(2).unwrap();
    assert!(wait_until(|| mock.pings.load(Ordering::SeqCst) >= 1).await);

    drop(connector);

    // The monitor task holds the last other reference to the transport.
    assert!(wait_until(|| Arc::strong_count(&mock) == 1).await);
    let pings = mock.pings.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.pings.load(Ordering::SeqCst), pings);
}

#[tokio::test]
async fn shutdown_stops_monitor_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = builder(dir.path(), Duration::from_secs(60))
        .transport_factory(MockFactory(mock.clone()))
        .build()
        .unwrap();
    connector.connect(2).await.unwrap();
    connector.enable_persistence(2).unwrap();

    let joined = tokio::time::timeout(Duration::from_secs(1), connector.shutdown()).await;
    assert!(joined.is_ok(), "monitor did not observe shutdown");
    assert_eq!(mock.pings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn teardown_detaches_callbacks() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockTransport::new();
    let connector = connector(dir.path(), &mock);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    connector.register_message_callback(example_schema(), move |_: &ParsedChunks| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    connector.connect(2).await.unwrap();
    drop(connector);

    assert_eq!(mock.resets.load(Ordering::SeqCst), 1);
    mock.deliver(inbound_frame("example/v1", json!({"x": 1})));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
