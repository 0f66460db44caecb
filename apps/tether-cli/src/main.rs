//! tether command-line client.
//!
//! Connects to a server, prints every state change and inbound event, and
//! sends each stdin line of the form `<kind> <json-payload>`.

mod config;
mod endpoint;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use tether_connection::{
    ConnectionManager, ConnectionState, HandshakeMode, InboundEvent, ReconnectConfig,
};

use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Connect to a tether endpoint and stream its events")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./tether.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP(S) base URL of the server; overrides the config file
    #[arg(long)]
    base_url: Option<String>,

    /// Socket path on the server; overrides the config file
    #[arg(long)]
    socket_path: Option<String>,

    /// Session token sent in the `auth` frame
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: String,

    /// Wait for `auth_ok` and back off exponentially between retries
    #[arg(long)]
    hardened: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(socket_path) = cli.socket_path {
        config.socket_path = socket_path;
    }
    if cli.hardened {
        config.connection.handshake = HandshakeMode::Acknowledged;
        config.connection.reconnect = ReconnectConfig::exponential();
    }

    let endpoint = endpoint::socket_endpoint(&config.base_url, &config.socket_path)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %endpoint,
        handshake = ?config.connection.handshake,
        "starting tether client"
    );

    let manager = ConnectionManager::websocket(config.connection)?;
    let mut changes = manager
        .take_state_changes()
        .context("state change stream already taken")?;
    let _printer = manager.subscribe("*", print_event);

    manager.connect(endpoint, cli.token);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, disconnecting");
                break;
            }
            Some(change) = changes.recv() => {
                println!("state: {} -> {}", change.from, change.to);
                if let ConnectionState::Rejected { reason } = &change.to {
                    manager.shutdown();
                    anyhow::bail!("server rejected the token: {reason}");
                }
                if change.to == ConnectionState::Closed {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => handle_line(&manager, &line),
                None => stdin_open = false,
            },
        }
    }

    manager.disconnect();
    manager.shutdown();
    Ok(())
}

fn print_event(event: &InboundEvent) {
    println!("<< {} {}", event.kind, event.payload);
}

fn handle_line(manager: &ConnectionManager, line: &str) {
    match parse_outbound(line) {
        Ok(None) => {}
        Ok(Some((kind, payload))) => {
            if !manager.send(kind, payload) {
                eprintln!("not sent: {} ({})", kind, manager.state());
            }
        }
        Err(e) => eprintln!("{e:#}"),
    }
}

/// Splits `<kind> <json-payload>`; a bare kind sends a `null` payload.
fn parse_outbound(line: &str) -> anyhow::Result<Option<(&str, serde_json::Value)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (kind, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let payload = if rest.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(rest).with_context(|| format!("invalid JSON payload for {kind:?}"))?
    };
    Ok(Some((kind, payload)))
}
