//! Message shapes for the gateway keepalive protocol.
//!
//! The gateway drives a small JSON-object protocol over the WebSocket:
//!
//! 1. Gateway sends [`ServerRequest::Auth`] with a request id
//! 2. Client replies with [`AuthReply`] echoing the id and carrying the
//!    device identity in [`AuthResult`]
//! 3. Client sends [`Ping`] every heartbeat period; the gateway answers
//!    with [`ServerRequest::Pong`], which requires no reply
//!
//! Frames the client does not recognize deserialize as
//! [`Inbound::Unknown`] and are ignored by the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// User-agent presented in the connection handshake and AUTH result.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

/// Device descriptor presented in the AUTH result.
pub const DEVICE_TYPE: &str = "desktop, Linux, x86_64, Safari, 17.0";

/// Client version reported to the gateway during AUTH.
pub const CLIENT_VERSION: &str = "4.28.1";

/// Version stamped on every outbound PING envelope.
pub const MESSAGE_VERSION: &str = "1.0.0";

/// Action name echoed back in [`AuthReply::origin_action`].
pub const ACTION_AUTH: &str = "AUTH";

/// Requests the gateway sends to the client, discriminated by `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ServerRequest {
    /// Challenge asking the client to identify itself. Each request is
    /// answered independently with exactly one [`AuthReply`].
    #[serde(rename = "AUTH")]
    Auth {
        /// Request id, echoed untouched in the reply. The gateway may use
        /// any JSON scalar here, so it is kept opaque.
        id: Value,
    },
    /// Acknowledgement of a client [`Ping`]. Logged only, never answered.
    #[serde(rename = "PONG")]
    Pong {
        /// Id of the acknowledged message.
        id: Value,
    },
}

/// Discriminated union of inbound frames.
///
/// Unrecognized actions fall through to [`Inbound::Unknown`] so that new
/// gateway message types never fail the session (forward-compatible
/// catch-all).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    /// A request the client knows how to handle.
    Request(ServerRequest),
    /// Any other well-formed JSON frame.
    Unknown(Value),
}

/// Reply to an AUTH challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthReply {
    /// Untouched echo of the request id from [`ServerRequest::Auth`].
    pub id: Value,
    /// Always [`ACTION_AUTH`]; names the request being answered.
    pub origin_action: String,
    /// Identity payload.
    pub result: AuthResult,
}

impl AuthReply {
    /// Builds a reply for the AUTH request carrying `id`.
    pub fn new(id: impl Into<Value>, result: AuthResult) -> Self {
        Self {
            id: id.into(),
            origin_action: ACTION_AUTH.to_string(),
            result,
        }
    }
}

/// Identity payload of an [`AuthReply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Persistent device identifier for this network path.
    pub browser_id: String,
    /// Configured account identifier.
    pub user_id: String,
    /// Fixed user-agent string, matching the handshake header.
    pub user_agent: String,
    /// Current Unix timestamp in seconds.
    pub timestamp: u64,
    /// Fixed device descriptor string.
    pub device_type: String,
    /// Client version string.
    pub version: String,
}

/// Heartbeat sent by the client while the connection is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Fresh random id, unique per heartbeat.
    pub id: String,
    /// Always [`MESSAGE_VERSION`].
    pub version: String,
    /// Always `"PING"`.
    pub action: String,
    /// Empty object on the wire.
    pub data: Value,
}

impl Ping {
    /// Builds a heartbeat with a fresh random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            version: MESSAGE_VERSION.to_string(),
            action: "PING".to_string(),
            data: Value::Object(serde_json::Map::new()),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_request_deserializes() {
        let json = r#"{"id": "req-1", "action": "AUTH"}"#;
        let inbound: Inbound = serde_json::from_str(json).unwrap();

        match inbound {
            Inbound::Request(ServerRequest::Auth { id }) => assert_eq!(id, "req-1"),
            other => panic!("Expected Auth, got {:?}", other),
        }
    }

    #[test]
    fn pong_deserializes() {
        let json = r#"{"id": "p-9", "action": "PONG"}"#;
        let inbound: Inbound = serde_json::from_str(json).unwrap();

        match inbound {
            Inbound::Request(ServerRequest::Pong { id }) => assert_eq!(id, "p-9"),
            other => panic!("Expected Pong, got {:?}", other),
        }
    }

    #[test]
    fn numeric_auth_id_parses_and_is_kept_opaque() {
        let json = r#"{"id": 42, "action": "AUTH"}"#;
        let inbound: Inbound = serde_json::from_str(json).unwrap();

        match inbound {
            Inbound::Request(ServerRequest::Auth { id }) => assert_eq!(id, Value::from(42)),
            other => panic!("Expected Auth, got {:?}", other),
        }
    }

    #[test]
    fn unknown_action_is_forward_compatible() {
        let json = r#"{"id": "x", "action": "ROTATE_KEYS", "data": {"k": 1}}"#;
        let inbound: Inbound = serde_json::from_str(json).unwrap();

        assert!(matches!(inbound, Inbound::Unknown(_)));
    }

    #[test]
    fn auth_reply_wire_shape() {
        let reply = AuthReply::new(
            "req-1",
            AuthResult {
                browser_id: "b-123".to_string(),
                user_id: "u-456".to_string(),
                user_agent: USER_AGENT.to_string(),
                timestamp: 1_700_000_000,
                device_type: DEVICE_TYPE.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        );

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["id"], "req-1");
        assert_eq!(value["origin_action"], "AUTH");
        assert_eq!(value["result"]["browser_id"], "b-123");
        assert_eq!(value["result"]["user_id"], "u-456");
        assert_eq!(value["result"]["version"], CLIENT_VERSION);
        assert_eq!(value["result"]["timestamp"], 1_700_000_000);
    }

    #[test]
    fn ping_wire_shape() {
        let ping = Ping::new();
        let value = serde_json::to_value(&ping).unwrap();

        assert_eq!(value["action"], "PING");
        assert_eq!(value["version"], MESSAGE_VERSION);
        assert!(value["data"].as_object().unwrap().is_empty());
        assert!(!value["id"].as_str().unwrap().is_empty());
    }

    #[test]
    fn ping_ids_are_unique() {
        let a = Ping::new();
        let b = Ping::new();
        assert_ne!(a.id, b.id);
    }
}
