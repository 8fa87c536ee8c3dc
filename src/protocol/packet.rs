//! Engine.IO v4 and Socket.IO v5 text packet codec
//!
//! Every websocket text frame is one Engine.IO packet: a single type digit
//! followed by its payload. Engine.IO `message` packets carry a Socket.IO
//! packet with the layout
//! `<type>[<namespace>,][<ack id>][<json>]`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, StreamError};

/// Namespace used when a packet does not name one
pub const DEFAULT_NAMESPACE: &str = "/";

/// Payload of the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id
    pub sid: String,

    /// Transports the server would upgrade to (unused on websocket)
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Server ping period in milliseconds
    pub ping_interval: u64,

    /// Grace period after a missed ping, in milliseconds
    pub ping_timeout: u64,

    /// Largest packet the server accepts, in bytes
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the link may stay silent before it is considered dead
    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a websocket text frame
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, body) = split_type(text, "engine packet")?;

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body).map_err(|e| {
                StreamError::protocol("engine open packet", e.to_string())
            })?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(StreamError::protocol(
                "engine packet",
                format!("unknown packet type '{}'", other),
            )),
        }
    }

    /// Encode as a websocket text frame
    pub fn encode(&self) -> String {
        match self {
            // Servers send open; clients never do, but keep the codec symmetric
            EnginePacket::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet body
#[derive(Debug, Clone, PartialEq)]
pub enum SocketBody {
    Connect(Option<Value>),
    Disconnect,
    Event { id: Option<u64>, data: Vec<Value> },
    Ack { id: u64, data: Vec<Value> },
    ConnectError(Value),
}

/// Socket.IO packet addressed to a namespace
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub namespace: String,
    pub body: SocketBody,
}

impl SocketPacket {
    /// Packet on the default namespace
    pub fn new(body: SocketBody) -> Self {
        Self { namespace: DEFAULT_NAMESPACE.to_string(), body }
    }

    /// Namespace connect request sent by the client after the open packet
    pub fn connect() -> Self {
        Self::new(SocketBody::Connect(None))
    }

    /// Namespace disconnect
    pub fn disconnect() -> Self {
        Self::new(SocketBody::Disconnect)
    }

    /// Event without acknowledgement
    pub fn event(name: &str, args: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(name.to_string()));
        data.extend(args);
        Self::new(SocketBody::Event { id: None, data })
    }

    /// Whether the packet targets the default namespace
    pub fn is_default_namespace(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }

    /// Decode the payload of an Engine.IO message packet
    pub fn decode(text: &str) -> Result<Self> {
        let (kind, mut rest) = split_type(text, "socket packet")?;

        if matches!(kind, '5' | '6') {
            return Err(StreamError::protocol(
                "socket packet",
                "binary packets are not supported",
            ));
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    namespace = rest[..end].to_string();
                    rest = &rest[end + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits].parse::<u64>().map_err(|e| {
                StreamError::protocol("socket packet ack id", e.to_string())
            })?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let json = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest).map_err(|e| {
                StreamError::protocol("socket packet payload", e.to_string())
            })?)
        };

        let body = match kind {
            '0' => SocketBody::Connect(json),
            '1' => SocketBody::Disconnect,
            '2' => SocketBody::Event { id, data: expect_array(json, "event")? },
            '3' => {
                let id = id.ok_or_else(|| StreamError::protocol("ack packet", "missing ack id"))?;
                SocketBody::Ack { id, data: expect_array(json, "ack")? }
            }
            '4' => SocketBody::ConnectError(json.unwrap_or(Value::Null)),
            other => {
                return Err(StreamError::protocol(
                    "socket packet",
                    format!("unknown packet type '{}'", other),
                ));
            }
        };

        Ok(Self { namespace, body })
    }

    /// Encode as the payload of an Engine.IO message packet
    pub fn encode(&self) -> String {
        let (kind, id, json) = match &self.body {
            SocketBody::Connect(data) => ('0', None, data.clone()),
            SocketBody::Disconnect => ('1', None, None),
            SocketBody::Event { id, data } => ('2', *id, Some(Value::Array(data.clone()))),
            SocketBody::Ack { id, data } => ('3', Some(*id), Some(Value::Array(data.clone()))),
            SocketBody::ConnectError(data) => ('4', None, Some(data.clone())),
        };

        let mut out = String::new();
        out.push(kind);
        if !self.is_default_namespace() {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(json) = json {
            out.push_str(&json.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO message packet
    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }
}

fn split_type<'a>(text: &'a str, context: &str) -> Result<(char, &'a str)> {
    match text.as_bytes().first() {
        Some(byte) if byte.is_ascii_digit() => Ok((*byte as char, &text[1..])),
        Some(_) => Err(StreamError::protocol(context, "packet does not start with a type digit")),
        None => Err(StreamError::protocol(context, "empty packet")),
    }
}

fn expect_array(json: Option<Value>, context: &str) -> Result<Vec<Value>> {
    match json {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        Some(other) => Err(StreamError::protocol(
            context,
            format!("expected a non-empty array, got {}", other),
        )),
        None => Err(StreamError::protocol(context, "missing payload")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_flask_socketio_open_packet() {
        let text = r#"0{"sid":"lv8PXVd4kYZZcPd1AAAA","upgrades":[],"pingTimeout":20000,"pingInterval":25000,"maxPayload":1000000}"#;
        let packet = EnginePacket::decode(text).unwrap();

        match packet {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "lv8PXVd4kYZZcPd1AAAA");
                assert_eq!(handshake.max_payload, Some(1_000_000));
                assert_eq!(handshake.heartbeat_window(), Duration::from_secs(45));
            }
            other => panic!("expected open packet, got {:?}", other),
        }
    }

    #[test]
    fn ping_and_message_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(
            EnginePacket::decode("40").unwrap(),
            EnginePacket::Message("0".to_string())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("x").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("é").is_err());
        assert!(EnginePacket::decode("0{not json").is_err());
    }

    #[test]
    fn connect_ack_carries_sid() {
        let packet = SocketPacket::decode(r#"0{"sid":"abc"}"#).unwrap();
        assert!(packet.is_default_namespace());
        assert_eq!(packet.body, SocketBody::Connect(Some(json!({"sid": "abc"}))));
    }

    #[test]
    fn client_connect_encodes_to_bare_type() {
        assert_eq!(SocketPacket::connect().into_engine().encode(), "40");
        assert_eq!(SocketPacket::disconnect().into_engine().encode(), "41");
    }

    #[test]
    fn event_with_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/lanes,12["response_back","data:x"]"#).unwrap();
        assert_eq!(packet.namespace, "/lanes");
        assert_eq!(
            packet.body,
            SocketBody::Event { id: Some(12), data: vec![json!("response_back"), json!("data:x")] }
        );
        assert_eq!(packet.encode(), r#"2/lanes,12["response_back","data:x"]"#);
    }

    #[test]
    fn event_encoding_matches_socketio_client() {
        let packet = SocketPacket::event("image", vec![json!("data:image/jpeg;base64,AAAA")]);
        assert_eq!(
            packet.into_engine().encode(),
            r#"42["image","data:image/jpeg;base64,AAAA"]"#
        );
    }

    #[test]
    fn connect_error_payload() {
        let packet = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert_eq!(packet.body, SocketBody::ConnectError(json!({"message": "Not authorized"})));
    }

    #[test]
    fn binary_and_malformed_events_are_rejected() {
        assert!(SocketPacket::decode(r#"51-["image",{"_placeholder":true,"num":0}]"#).is_err());
        assert!(SocketPacket::decode("2").is_err());
        assert!(SocketPacket::decode(r#"2{"not":"an array"}"#).is_err());
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode(r#"3["no id"]"#).is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(text in ".*") {
                let _ = EnginePacket::decode(&text);
                let _ = SocketPacket::decode(&text);
            }

            #[test]
            fn string_events_survive_the_codec(
                name in "[a-z_]{1,16}",
                arg in ".*",
                namespace in prop::option::of("/[a-z]{1,8}"),
            ) {
                let mut packet = SocketPacket::event(&name, vec![Value::String(arg)]);
                if let Some(namespace) = namespace {
                    packet.namespace = namespace;
                }

                let engine = EnginePacket::decode(&packet.clone().into_engine().encode()).unwrap();
                let EnginePacket::Message(body) = engine else {
                    return Err(TestCaseError::fail("expected message packet"));
                };
                prop_assert_eq!(SocketPacket::decode(&body).unwrap(), packet);
            }
        }
    }
}
