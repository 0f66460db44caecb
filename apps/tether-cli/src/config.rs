//! CLI configuration.
//!
//! Stored as TOML. Every key is optional:
//!
//! ```toml
//! base_url = "https://chat.example.com"
//! socket_path = "/ws"
//!
//! [connection]
//! handshake = "acknowledged"
//!
//! [connection.reconnect]
//! initial_delay_ms = 500
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tether_connection::ConnectionConfig;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// HTTP(S) address of the server; the socket endpoint is derived from it.
    pub base_url: String,
    pub socket_path: String,
    pub connection: ConnectionConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            socket_path: "/ws".into(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl CliConfig {
    /// Loads `path`, or `tether.toml` from the working directory if present.
    ///
    /// An explicit path must exist; the implicit one falls back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::read(&fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: CliConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        config.connection.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}
