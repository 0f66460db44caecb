use std::time::Duration;

/// How often the client pings the server to keep the socket alive.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(25);

/// Read deadline for an open socket.
///
/// Any incoming frame (pong, event, control) resets it. If nothing arrives
/// within this window the connection is considered dead and is closed,
/// which hands the decision to the reconnection policy.
pub const WS_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Maximum size of a single frame in bytes (1 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Number of outbound frames buffered per socket before `send` reports failure.
pub const WS_WRITE_BUFFER: usize = 256;

/// Flat delay between an unsolicited close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// How long an acknowledged handshake waits for `auth_ok` / `auth_failed`.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of the first outbound frame on every socket.
pub const KIND_AUTH: &str = "auth";

/// Kind the server sends when it accepts the credential.
pub const KIND_AUTH_OK: &str = "auth_ok";

/// Kind the server sends when it rejects the credential.
pub const KIND_AUTH_FAILED: &str = "auth_failed";

/// Frame kinds reserved for the connection handshake.
///
/// Every other kind is application traffic and is routed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Auth,
    AuthOk,
    AuthFailed,
}

impl ControlKind {
    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Auth => KIND_AUTH,
            ControlKind::AuthOk => KIND_AUTH_OK,
            ControlKind::AuthFailed => KIND_AUTH_FAILED,
        }
    }

    /// Classifies a wire kind, returning `None` for application kinds.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            KIND_AUTH => Some(ControlKind::Auth),
            KIND_AUTH_OK => Some(ControlKind::AuthOk),
            KIND_AUTH_FAILED => Some(ControlKind::AuthFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
