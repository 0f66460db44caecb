use serde::{Deserialize, Serialize};

/// Payload of the `auth` frame sent once right after the socket opens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Payload of `auth_ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAccepted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Payload of `auth_failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthRejected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
