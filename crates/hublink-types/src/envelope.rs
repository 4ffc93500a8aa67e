//! The wire envelope — an event tag plus an arbitrary JSON payload.
//!
//! Every message exchanged between a client and the hub is one envelope,
//! serialized as JSON. The event namespace is open to applications except
//! for the single reserved value [`PING_EVENT`], which carries the sender's
//! per-process instance id and drives the liveness protocol.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// The reserved protocol-internal event tag.
pub const PING_EVENT: &str = "ping";

/// A wire envelope.
///
/// The sender's identity is supplied as a transport-level prefix on
/// hub-bound messages and is never part of the serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event tag. `"ping"` is reserved; any other value is application-defined.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

impl Envelope {
    /// Build an application envelope.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build a heartbeat envelope carrying the sender's instance id.
    pub fn ping(instance: Uuid) -> Self {
        Self {
            event: PING_EVENT.to_string(),
            data: json!({ "id": instance.to_string() }),
        }
    }

    /// Whether this envelope is a protocol heartbeat.
    pub fn is_ping(&self) -> bool {
        self.event == PING_EVENT
    }

    /// Extract the instance id from a ping envelope.
    ///
    /// Returns `None` for non-ping envelopes and for pings whose `data.id`
    /// is missing or not a valid UUID.
    pub fn ping_instance(&self) -> Option<Uuid> {
        if !self.is_ping() {
            return None;
        }
        self.data
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse an envelope from its JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_envelope_shape() {
        let instance = Uuid::new_v4();
        let env = Envelope::ping(instance);
        assert!(env.is_ping());
        assert_eq!(env.ping_instance(), Some(instance));

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["event"], "ping");
        assert_eq!(json["data"]["id"], instance.to_string());
    }

    #[test]
    fn test_application_envelope_roundtrip() {
        let env = Envelope::new("message", json!({ "body": "ABC", "n": 7 }));
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
        assert!(!decoded.is_ping());
        assert_eq!(decoded.ping_instance(), None);
    }

    #[test]
    fn test_ping_with_bad_instance_id() {
        let env = Envelope::new(PING_EVENT, json!({ "id": "not-a-uuid" }));
        assert!(env.is_ping());
        assert_eq!(env.ping_instance(), None);

        let env = Envelope::new(PING_EVENT, json!({}));
        assert_eq!(env.ping_instance(), None);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(b"{\"event\": 42}").is_err());
    }
}
