//! The JSON envelope exchanged over a channel, and its action codes.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Action codes carried in [`Envelope::action`].
pub mod action {
    /// Placeholder for an envelope whose action was never set.
    pub const INVALID: i32 = 0;

    /// A request expecting a reply.
    pub const CALL: i32 = -255;

    /// The reply to a [`CALL`].
    pub const REPLY: i32 = -254;

    /// A one-way push fanned out to a room.
    pub const BROADCAST: i32 = 255;
}

/// One logical message on the wire.
///
/// `id` correlates a reply with its call; pushes reuse the id slot for the
/// sender's own bookkeeping. Exactly one of `data` and `error` is expected
/// to be meaningful on a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub id: u64,
    pub action: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Envelope {
    /// A request envelope.
    pub fn call(id: u64, method: impl Into<String>, data: Vec<u8>) -> Self {
        Envelope {
            id,
            action: action::CALL,
            method: method.into(),
            data,
            error: String::new(),
        }
    }

    /// A successful reply, echoing the request id.
    pub fn reply(id: u64, data: Vec<u8>) -> Self {
        Envelope {
            id,
            action: action::REPLY,
            method: String::new(),
            data,
            error: String::new(),
        }
    }

    /// A failed reply carrying the error text instead of a payload.
    pub fn reply_error(id: u64, error: impl Into<String>) -> Self {
        Envelope {
            id,
            action: action::REPLY,
            method: String::new(),
            data: Vec::new(),
            error: error.into(),
        }
    }

    /// A one-way broadcast push.
    pub fn broadcast(id: u64, method: impl Into<String>, data: Vec<u8>) -> Self {
        Envelope {
            id,
            action: action::BROADCAST,
            method: method.into(),
            data,
            error: String::new(),
        }
    }

    pub fn is_call(&self) -> bool {
        self.action == action::CALL
    }

    pub fn is_reply(&self) -> bool {
        self.action == action::REPLY
    }

    pub fn is_broadcast(&self) -> bool {
        self.action == action::BROADCAST
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(buf: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_roundtrip() {
        let env = Envelope::call(17, "user.login", b"{\"name\":\"sam\"}".to_vec());
        let back = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(back, env);
        assert!(back.is_call());
    }

    #[test]
    fn test_reply_error_keeps_only_error() {
        let env = Envelope::reply_error(17, "no such user");
        let wire = env.encode().unwrap();
        let text = String::from_utf8(wire.clone()).unwrap();
        assert!(!text.contains("method"));
        assert!(!text.contains("data"));
        let back = Envelope::decode(&wire).unwrap();
        assert_eq!(back.error, "no such user");
        assert!(back.is_reply());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let back = Envelope::decode(br#"{"id":3,"action":255}"#).unwrap();
        assert_eq!(back.id, 3);
        assert!(back.is_broadcast());
        assert!(back.method.is_empty());
        assert!(back.data.is_empty());
        assert!(back.error.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(Envelope::decode(b"{not json").is_err());
    }
}
