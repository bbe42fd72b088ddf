//! `cthun-agent` — reference Cthun client.
//!
//! Connects to a broker with mutual TLS, logs in, keeps the connection alive,
//! and logs every `example/v1` message it receives.  Optionally sends one
//! `example/v1` message right after connecting.
//!
//! Usage:
//!   cthun-agent --config /etc/cthun/agent.toml
//!   cthun-agent --server-url wss://broker:8090/cthun/ \
//!       --ca ca.pem --crt agent01.pem --key agent01.key \
//!       --send-to cth://controller01/controller
//!
//! Logging is controlled by `RUST_LOG` (default: `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cthun_client::{
    ConnectorBuilder, ConnectorConfig, ContentType, ParsedChunks, Schema, TypeConstraint,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXAMPLE_SCHEMA: &str = "example/v1";

/// Reference Cthun client.
#[derive(Debug, Parser)]
#[command(name = "cthun-agent", version, about)]
struct Cli {
    /// TOML connector config.  Flags below override its values.
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Broker URL (e.g. `wss://broker:8090/cthun/`).
    #[arg(long)]
    server_url: Option<String>,
    /// Client type announced at login.
    #[arg(long)]
    client_type: Option<String>,
    /// CA certificate (PEM).
    #[arg(long)]
    ca: Option<PathBuf>,
    /// Client certificate (PEM).  Its common name becomes the client address.
    #[arg(long)]
    crt: Option<PathBuf>,
    /// Client private key (PEM).
    #[arg(long)]
    key: Option<PathBuf>,
    /// Open attempts per connect and per reconnect.
    #[arg(long)]
    max_connect_attempts: Option<u32>,
    /// Do not start the monitor task (no heartbeat, no reconnect).
    #[arg(long)]
    no_persist: bool,
    /// Send one example message to this endpoint after connecting.  Repeatable.
    #[arg(long = "send-to")]
    send_to: Vec<String>,
    /// Expiry of the example message, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u32,
    /// Emit logs as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = resolve_config(&cli)?;
    tracing::info!(
        url = %config.server_url,
        client_type = %config.client_type,
        "starting cthun agent"
    );

    let connector = ConnectorBuilder::from_config(&config)
        .build()
        .context("building connector")?;

    // ── Handlers ─────────────────────────────────────────────────────
    let mut schema = Schema::new(EXAMPLE_SCHEMA, ContentType::Json);
    schema.add_constraint("message", TypeConstraint::String, true);
    connector.register_message_callback(schema, |chunks: &ParsedChunks| {
        let text = chunks
            .data
            .as_json()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        tracing::info!(
            id = %chunks.envelope.id,
            sender = %chunks.envelope.sender,
            message = %text,
            "received example message"
        );
    });

    // ── Connect ──────────────────────────────────────────────────────
    connector
        .connect(config.max_connect_attempts)
        .await
        .context("connecting to broker")?;

    if !cli.no_persist {
        connector
            .enable_persistence(config.max_connect_attempts)
            .context("starting connection monitor")?;
    }

    if !cli.send_to.is_empty() {
        let data = serde_json::json!({ "message": format!("hello from {}", connector.identity().id) });
        connector
            .send(cli.send_to.as_slice(), EXAMPLE_SCHEMA, cli.timeout_secs, &data, &[])
            .await
            .context("sending example message")?;
        tracing::info!(endpoints = ?cli.send_to, "sent example message");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    connector.shutdown().await;
    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ConnectorConfig> {
    let mut config = match &cli.config {
        Some(path) => ConnectorConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let (Some(server_url), Some(ca), Some(crt), Some(key)) =
                (&cli.server_url, &cli.ca, &cli.crt, &cli.key)
            else {
                anyhow::bail!("either --config or all of --server-url, --ca, --crt and --key are required");
            };
            ConnectorConfig::new(server_url.clone(), ca.clone(), crt.clone(), key.clone())
        }
    };

    if let Some(url) = &cli.server_url {
        config.server_url = url.clone();
    }
    if let Some(t) = &cli.client_type {
        config.client_type = t.clone();
    }
    if let Some(ca) = &cli.ca {
        config.ca = ca.clone();
    }
    if let Some(crt) = &cli.crt {
        config.crt = crt.clone();
    }
    if let Some(key) = &cli.key {
        config.key = key.clone();
    }
    if let Some(n) = cli.max_connect_attempts {
        config.max_connect_attempts = n;
    }
    Ok(config)
}

fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
