use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed connector settings.
///
/// ```toml
/// server_url = "wss://broker.example.com:8090/cthun/"
/// client_type = "agent"
/// ca = "/etc/cthun/ssl/ca.pem"
/// crt = "/etc/cthun/ssl/agent01.pem"
/// key = "/etc/cthun/ssl/agent01.key"
///
/// [reconnect]
/// initial_delay_ms = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub server_url: String,
    #[serde(default = "d_client_type")]
    pub client_type: String,
    pub ca: PathBuf,
    pub crt: PathBuf,
    pub key: PathBuf,
    /// Seconds between connection checks once persistence is enabled.
    #[serde(default = "d_15")]
    pub check_interval_secs: u64,
    /// Open attempts per `connect` / reconnect.
    #[serde(default = "d_2")]
    pub max_connect_attempts: u32,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl ConnectorConfig {
    /// Config with every optional setting at its default.
    pub fn new(
        server_url: impl Into<String>,
        ca: impl Into<PathBuf>,
        crt: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            client_type: d_client_type(),
            ca: ca.into(),
            crt: crt.into(),
            key: key.into(),
            check_interval_secs: d_15(),
            max_connect_attempts: d_2(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConnectorError> {
        toml::from_str(raw).map_err(|e| ConnectorError::Config(format!("invalid config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_30000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_1000(),
            max_delay_ms: d_30000(),
            backoff_factor: d_factor(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_client_type() -> String {
    "agent".into()
}

fn d_15() -> u64 {
    15
}

fn d_2() -> u32 {
    2
}

fn d_1000() -> u64 {
    1000
}

fn d_30000() -> u64 {
    30_000
}

fn d_factor() -> f64 {
    2.0
}
