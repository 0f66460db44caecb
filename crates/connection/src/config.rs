//! Connection configuration.
//!
//! Every field has a default, so an empty TOML table or `{}` yields the
//! minimal behaviour: flat 5 s retry and a fire-and-forget handshake.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tether_protocol::constants::DEFAULT_AUTH_TIMEOUT;

use crate::handshake::HandshakeMode;
use crate::reconnection::ReconnectConfig;
use crate::ws::WsTransportConfig;

/// Errors from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectConfig,
    pub handshake: HandshakeMode,
    /// Deadline for `auth_ok` in [`HandshakeMode::Acknowledged`].
    #[serde(alias = "authTimeoutMs")]
    pub auth_timeout_ms: u64,
    pub transport: WsTransportConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            handshake: HandshakeMode::default(),
            auth_timeout_ms: DEFAULT_AUTH_TIMEOUT.as_millis() as u64,
            transport: WsTransportConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Acknowledged handshake plus exponential backoff.
    pub fn hardened() -> Self {
        Self {
            reconnect: ReconnectConfig::exponential(),
            handshake: HandshakeMode::Acknowledged,
            ..Self::default()
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconnect.validate()?;
        if self.handshake == HandshakeMode::Acknowledged && self.auth_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "auth_timeout_ms must be positive for an acknowledged handshake".into(),
            ));
        }
        self.transport.validate()
    }
}
