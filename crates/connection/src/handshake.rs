//! Authentication handshake: the first frame on every socket.
//!
//! Two modes are supported. [`HandshakeMode::FireAndForget`] marks the
//! session connected as soon as the `auth` frame is handed to the transport.
//! [`HandshakeMode::Acknowledged`] waits for the server to answer with
//! `auth_ok` or `auth_failed`, so a bad credential ends up in a terminal
//! state instead of an endless retry loop.

use serde::{Deserialize, Serialize};

use tether_protocol::constants::KIND_AUTH;
use tether_protocol::{AuthAccepted, AuthRejected, AuthRequest, ControlKind, Envelope, InboundEvent, ProtocolError};

use crate::types::Credential;

/// How the client decides that the handshake succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// Connected immediately after the `auth` frame is sent.
    #[default]
    FireAndForget,
    /// Connected only after the server sends `auth_ok`.
    Acknowledged,
}

/// Server verdict on the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted { session_id: Option<String> },
    Rejected { reason: String },
}

/// Builds the `{"kind":"auth","payload":{"token":...}}` frame.
pub fn auth_frame(credential: &Credential) -> Result<String, ProtocolError> {
    let request = AuthRequest {
        token: credential.expose().to_string(),
    };
    Envelope::new(KIND_AUTH, &request)?.encode()
}

/// Returns the handshake verdict carried by `event`, if it is one.
///
/// A malformed or missing payload still counts: the kind alone decides.
pub fn classify(event: &InboundEvent) -> Option<AuthOutcome> {
    match ControlKind::from_kind(&event.kind)? {
        ControlKind::AuthOk => {
            let session_id = event
                .parse_payload::<AuthAccepted>()
                .ok()
                .and_then(|a| a.session_id);
            Some(AuthOutcome::Accepted { session_id })
        }
        ControlKind::AuthFailed => {
            let reason = event
                .parse_payload::<AuthRejected>()
                .ok()
                .and_then(|r| r.reason)
                .unwrap_or_else(|| "authentication rejected".to_string());
            Some(AuthOutcome::Rejected { reason })
        }
        // The server has no business echoing our own handshake kind.
        ControlKind::Auth => None,
    }
}
