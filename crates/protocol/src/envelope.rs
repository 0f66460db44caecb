use serde::{Deserialize, Serialize};

use crate::constants::WS_MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;

/// Envelope for every text frame on the socket, in both directions.
///
/// `payload` is kept as a [`serde_json::Value`] so the connection core never
/// needs to know the schema of application events; subscribers decode it
/// with [`Envelope::parse_payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A frame received from the server.
pub type InboundEvent = Envelope;

/// A frame about to be sent to the server.
pub type OutboundMessage = Envelope;

impl Envelope {
    /// Creates an envelope from any serializable payload.
    pub fn new<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Creates an envelope from an already-built JSON value.
    pub fn from_value(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Serializes the envelope into one text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        if self.kind.is_empty() {
            return Err(ProtocolError::MissingKind);
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one text frame of at most [`WS_MAX_MESSAGE_SIZE`] bytes.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::decode_with_limit(text, WS_MAX_MESSAGE_SIZE)
    }

    /// Parses one text frame of at most `limit` bytes.
    ///
    /// Oversized frames are rejected before any JSON parsing happens.
    pub fn decode_with_limit(text: &str, limit: usize) -> Result<Self, ProtocolError> {
        if text.len() > limit {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                limit,
            });
        }
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.kind.is_empty() {
            return Err(ProtocolError::MissingKind);
        }
        Ok(envelope)
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::AuthRequest;

    #[test]
    fn decode_chat_message() {
        let env = Envelope::decode(r#"{"kind":"chat.message","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(env.kind, "chat.message");
        assert_eq!(env.payload, serde_json::json!({"text": "hi"}));
    }

    #[test]
    fn decode_missing_payload_is_null() {
        let env = Envelope::decode(r#"{"kind":"presence.ping"}"#).unwrap();
        assert_eq!(env.payload, serde_json::Value::Null);
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let env = Envelope::decode(r#"{"kind":"k","payload":1,"ts":123}"#).unwrap();
        assert_eq!(env.kind, "k");
        assert_eq!(env.payload, serde_json::json!(1));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode("not valid json {{{"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_non_object() {
        assert!(Envelope::decode("[1,2,3]").is_err());
        assert!(Envelope::decode(r#""chat.message""#).is_err());
    }

    #[test]
    fn decode_rejects_missing_or_empty_kind() {
        assert!(matches!(
            Envelope::decode(r#"{"payload":{}}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"kind":"","payload":{}}"#),
            Err(ProtocolError::MissingKind)
        ));
        assert!(Envelope::decode(r#"{"kind":42}"#).is_err());
    }

    #[test]
    fn decode_rejects_oversized_frame() {
        let huge = "x".repeat(WS_MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            Envelope::decode(&huge),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn decode_honors_custom_limit() {
        let text = format!(
            r#"{{"kind":"blob","payload":"{}"}}"#,
            "a".repeat(WS_MAX_MESSAGE_SIZE)
        );
        assert!(matches!(
            Envelope::decode(&text),
            Err(ProtocolError::TooLarge { limit: WS_MAX_MESSAGE_SIZE, .. })
        ));

        let env = Envelope::decode_with_limit(&text, 4 * WS_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(env.kind, "blob");

        assert!(matches!(
            Envelope::decode_with_limit(r#"{"kind":"k"}"#, 4),
            Err(ProtocolError::TooLarge { size: 12, limit: 4 })
        ));
    }

    #[test]
    fn encode_auth_frame_shape() {
        let env = Envelope::new(
            "auth",
            &AuthRequest {
                token: "tok1".into(),
            },
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"kind": "auth", "payload": {"token": "tok1"}})
        );
    }

    #[test]
    fn encode_rejects_empty_kind() {
        let env = Envelope::from_value("", serde_json::Value::Null);
        assert!(matches!(env.encode(), Err(ProtocolError::MissingKind)));
    }

    #[test]
    fn parse_payload_typed() {
        #[derive(Deserialize)]
        struct Chat {
            text: String,
        }
        let env = Envelope::from_value("chat.message", serde_json::json!({"text": "hi"}));
        let chat: Chat = env.parse_payload().unwrap();
        assert_eq!(chat.text, "hi");

        let bad = Envelope::from_value("chat.message", serde_json::json!(7));
        assert!(bad.parse_payload::<Chat>().is_err());
    }
}
