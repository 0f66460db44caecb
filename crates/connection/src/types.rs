//! Public types for the connection core.

use std::fmt;

/// Connection state of one logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Socket is being opened.
    Connecting,
    /// Socket is open and the `auth` frame was sent; waiting for `auth_ok`.
    Authenticating,
    /// Authenticated; inbound events are dispatched and sends are accepted.
    Connected,
    /// Connection lost, a retry is scheduled.
    Reconnecting { attempt: u32 },
    /// Closed by the caller or after the retry budget ran out.
    Closed,
    /// The server rejected the credential. Terminal until the next `connect()`.
    Rejected { reason: String },
}

impl ConnectionState {
    /// Returns `true` while a socket is being opened, authenticated or used.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Connected
        )
    }

    /// Returns `true` for states that only a new `connect()` can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Rejected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Authenticating => f.write_str("authenticating"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Closed => f.write_str("closed"),
            ConnectionState::Rejected { reason } => write!(f, "rejected: {reason}"),
        }
    }
}

/// A single state transition, emitted for every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Opaque bearer token supplied by the caller.
///
/// Never logged: `Debug` prints a placeholder.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Identifies one physical socket for its whole lifetime.
///
/// Handles are never reused within a manager, so events from a superseded
/// socket can always be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(pub u64);

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
