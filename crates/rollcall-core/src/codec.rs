//! Full-packet encode/decode
//!
//! `encode` serializes a [`Message`] behind its [`Header`], filling in the
//! message type and payload length; `decode` is the exact inverse. Payload
//! parsing is dispatched explicitly on the wire message type.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::{Header, MsgType};
use crate::message::Message;
use crate::roster;

/// Encode a message into a wire packet.
///
/// The header's `kind` and `payload_length` are set from the message; the
/// caller provides identity, timestamp, and sequence fields.
pub fn encode(header: &mut Header, message: &Message) -> Result<Bytes> {
    let payload = encode_payload(message)?;
    if payload.len() > u16::MAX as usize {
        return Err(Error::InvalidHeader("payload too large"));
    }
    header.kind = Some(message.kind());
    header.payload_length = payload.len() as u16;

    let mut buf = BytesMut::with_capacity(header.size() + payload.len());
    header.encode(&mut buf)?;
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a wire packet into its header and message.
pub fn decode(data: &[u8]) -> Result<(Header, Message)> {
    let (header, rest) = Header::decode(data)?;
    let payload_len = header.payload_length as usize;
    if rest.len() < payload_len {
        return Err(Error::Protocol(format!(
            "payload truncated: need {payload_len} bytes, have {}",
            rest.len()
        )));
    }
    let payload = &rest[..payload_len];

    let kind = header
        .kind
        .ok_or(Error::InvalidHeader("message type not set"))?;
    let message = match kind {
        MsgType::Ack => Message::Ack,
        MsgType::Unjoin => Message::Unjoin,
        MsgType::Join => Message::Join(serde_json::from_slice(payload)?),
        MsgType::Config => Message::Config(serde_json::from_slice(payload)?),
        MsgType::Data => Message::Data(serde_json::from_slice(payload)?),
        MsgType::Update => Message::Update(roster::unpack(payload)?),
    };
    Ok((header, message))
}

fn encode_payload(message: &Message) -> Result<Vec<u8>> {
    match message {
        Message::Ack | Message::Unjoin => Ok(Vec::new()),
        Message::Join(payload) => Ok(serde_json::to_vec(payload)?),
        Message::Config(payload) => Ok(serde_json::to_vec(payload)?),
        Message::Data(value) => Ok(serde_json::to_vec(value)?),
        Message::Update(states) => Ok(roster::pack(states)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DeviceId;
    use crate::message::{ConfigPayload, JoinPayload};
    use crate::person::Person;
    use serde_json::json;

    fn header_for(kind: MsgType, device: u16) -> Header {
        let mut header = Header::new(kind);
        header.device_id = Some(DeviceId(device));
        header
    }

    #[test]
    fn test_join_roundtrip() {
        let message = Message::Join(JoinPayload {
            people: vec![Person::new(0u64, false), Person::new(1u64, true)],
        });
        let mut header = header_for(MsgType::Join, 0);
        header.sequence = Some(5);

        let bytes = encode(&mut header, &message).unwrap();
        let (decoded_header, decoded) = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded_header.sequence, Some(5));
        assert_eq!(decoded_header.device_id, Some(DeviceId::REQUEST));
        assert_eq!(
            decoded_header.payload_length as usize,
            bytes.len() - decoded_header.size()
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let mut payload = ConfigPayload::new(2);
        payload.key = Some("127.0.0.1:9999".into());
        let message = Message::Config(payload);
        let mut header = header_for(MsgType::Config, 1);

        let bytes = encode(&mut header, &message).unwrap();
        let (_, decoded) = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_update_roundtrip() {
        let message = Message::Update(vec![false, true, true, false, true]);
        let mut header = header_for(MsgType::Update, 2);

        let bytes = encode(&mut header, &message).unwrap();
        let (_, decoded) = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_ack_has_no_payload() {
        let mut header = header_for(MsgType::Ack, 1);
        header.ack_sequence = Some(12);
        let bytes = encode(&mut header, &Message::Ack).unwrap();
        assert_eq!(bytes.len(), header.size());

        let (decoded_header, decoded) = decode(&bytes).unwrap();
        assert_eq!(decoded, Message::Ack);
        assert_eq!(decoded_header.ack_sequence, Some(12));
    }

    #[test]
    fn test_data_roundtrip() {
        let message = Message::Data(json!({"people": [0, 2, 4]}));
        let mut header = header_for(MsgType::Data, 1);
        let bytes = encode(&mut header, &message).unwrap();
        let (_, decoded) = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_truncated_payload() {
        let message = Message::Data(json!({"k": "value"}));
        let mut header = header_for(MsgType::Data, 1);
        let bytes = encode(&mut header, &message).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 4]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_malformed_json_payload() {
        let mut header = header_for(MsgType::Join, 0);
        header.payload_length = 3;
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        buf.extend_from_slice(b"{{{");
        assert!(decode(&buf).is_err());
    }
}
