//! Protocol messages
//!
//! A closed sum type over the six wire message kinds. The codec dispatches
//! explicitly from message type to payload format: JOIN and CONFIG are
//! JSON-object payloads like DATA, UPDATE is the bit-packed roster form, and
//! ACK/UNJOIN carry no payload at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::header::MsgType;
use crate::person::Person;

/// JOIN payload: the roster a client reports on, in contract order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub people: Vec<Person>,
}

/// CONFIG payload sent server→client after a successful join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Device id the server assigned to this client
    pub device_id: u16,
    /// Address key (`"ip:port"`) the server registered the client under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Server address override; defaults to the packet source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    /// Server port override; defaults to the packet source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    /// Additional configuration entries, passed through verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfigPayload {
    pub fn new(device_id: u16) -> Self {
        Self {
            device_id,
            key: None,
            server_ip: None,
            server_port: None,
            extra: Map::new(),
        }
    }
}

/// A rollcall protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Bare acknowledgement (ack sequence number travels in the header)
    Ack,
    /// Client requests to join with its roster
    Join(JoinPayload),
    /// Server assigns identity and connection info
    Config(ConfigPayload),
    /// Client leaves the audience
    Unjoin,
    /// Sitting states for the full roster, in join order
    Update(Vec<bool>),
    /// Generic JSON data
    Data(Value),
}

impl Message {
    /// The wire type this message encodes as
    pub fn kind(&self) -> MsgType {
        match self {
            Message::Ack => MsgType::Ack,
            Message::Join(_) => MsgType::Join,
            Message::Config(_) => MsgType::Config,
            Message::Unjoin => MsgType::Unjoin,
            Message::Update(_) => MsgType::Update,
            Message::Data(_) => MsgType::Data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_payload_json_shape() {
        let mut config = ConfigPayload::new(2);
        config.key = Some("10.0.0.5:2346".into());
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["device_id"], 2);
        assert_eq!(json["key"], "10.0.0.5:2346");
        // absent optionals are omitted, not null
        assert!(json.get("server_ip").is_none());
    }

    #[test]
    fn test_config_payload_extra_entries_roundtrip() {
        let parsed: ConfigPayload =
            serde_json::from_str(r#"{"device_id":3,"packet_wait_timeout":1.5}"#).unwrap();
        assert_eq!(parsed.device_id, 3);
        assert_eq!(parsed.extra["packet_wait_timeout"], 1.5);
    }

    #[test]
    fn test_message_kinds() {
        assert_eq!(Message::Ack.kind(), MsgType::Ack);
        assert_eq!(Message::Unjoin.kind(), MsgType::Unjoin);
        assert_eq!(Message::Update(vec![true]).kind(), MsgType::Update);
    }
}
