fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde::{Deserialize, Serialize};

    use tether_connection::handshake::{AuthOutcome, auth_frame, classify};
    use tether_connection::{Credential, Dispatcher};
    use tether_protocol::{AuthAccepted, AuthRejected, AuthRequest, Envelope, ProtocolError};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture as raw text, exactly as it would arrive on the socket.
    fn load_raw(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&load_raw(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Decodes a fixture into an envelope, re-encodes it, and compares JSON values.
    fn envelope_roundtrip(name: &str) -> Envelope {
        let fixture = load_fixture(name);
        let env = Envelope::decode(&load_raw(name))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let reencoded: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(fixture, reencoded, "roundtrip mismatch for {name}");
        env
    }

    /// Deserializes a fixture's payload into `T`, re-serializes it, and compares.
    fn payload_roundtrip<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + Serialize,
    {
        let env = Envelope::decode(&load_raw(name)).unwrap();
        let parsed: T = env
            .parse_payload()
            .unwrap_or_else(|e| panic!("failed to deserialize payload of {name}: {e}"));
        assert_eq!(
            serde_json::to_value(&parsed).unwrap(),
            env.payload,
            "payload roundtrip mismatch for {name}"
        );
        parsed
    }

    // --- Handshake frames ---

    #[test]
    fn fixture_auth_frame() {
        let frame = auth_frame(&Credential::new("tok-fixture-1")).unwrap();
        let sent: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(sent, load_fixture("auth.json"));

        let req: AuthRequest = payload_roundtrip("auth.json");
        assert_eq!(req.token, "tok-fixture-1");
    }

    #[test]
    fn fixture_auth_ok() {
        envelope_roundtrip("auth_ok.json");
        let accepted: AuthAccepted = payload_roundtrip("auth_ok.json");
        assert_eq!(accepted.session_id.as_deref(), Some("sess-42"));

        let env = Envelope::decode(&load_raw("auth_ok.json")).unwrap();
        assert_eq!(
            classify(&env),
            Some(AuthOutcome::Accepted {
                session_id: Some("sess-42".into())
            })
        );
    }

    #[test]
    fn fixture_auth_failed() {
        envelope_roundtrip("auth_failed.json");
        let rejected: AuthRejected = payload_roundtrip("auth_failed.json");
        assert_eq!(rejected.reason.as_deref(), Some("token expired"));

        let env = Envelope::decode(&load_raw("auth_failed.json")).unwrap();
        assert_eq!(
            classify(&env),
            Some(AuthOutcome::Rejected {
                reason: "token expired".into()
            })
        );
    }

    // --- Application events ---

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ChatMessage {
        conversation_id: String,
        from: String,
        text: String,
        sent_at: u64,
    }

    #[test]
    fn fixture_chat_message() {
        let env = envelope_roundtrip("chat_message.json");
        assert_eq!(env.kind, "chat.message");
        assert_eq!(classify(&env), None);

        let msg: ChatMessage = payload_roundtrip("chat_message.json");
        assert_eq!(msg.conversation_id, "c-7");
        assert_eq!(msg.sent_at, 1_718_000_000);
    }

    #[test]
    fn fixture_chat_message_reaches_typed_subscriber() {
        let dispatcher = Dispatcher::new();
        let got = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let g = got.clone();
        dispatcher.subscribe_json("chat.message", move |msg: ChatMessage| {
            g.lock().unwrap().push(msg);
        });

        let event = dispatcher.decode(&load_raw("chat_message.json")).unwrap();
        assert_eq!(dispatcher.publish(&event), 1);
        assert_eq!(got.lock().unwrap()[0].text, "see you at 6");
    }

    #[test]
    fn fixture_missing_payload_decodes_as_null() {
        let env = Envelope::decode(&load_raw("notification_no_payload.json")).unwrap();
        assert_eq!(env.kind, "notification.cleared");
        assert!(env.payload.is_null());

        let reencoded: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(
            reencoded,
            serde_json::json!({"kind": "notification.cleared", "payload": null})
        );
    }

    #[test]
    fn fixture_missing_kind_is_rejected() {
        let raw = load_raw("malformed_missing_kind.json");
        assert!(matches!(Envelope::decode(&raw), Err(ProtocolError::Json(_))));

        let dispatcher = Dispatcher::new();
        assert!(dispatcher.decode(&raw).is_none());
        assert_eq!(dispatcher.malformed_count(), 1);
    }
}
