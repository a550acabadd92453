//! Packet header encoding/decoding
//!
//! Rollcall header format (network byte order):
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Version (major << 4 | minor)                     │
//! │ Byte 1:     Message type                                     │
//! │ Byte 2-3:   Payload length (u16)                             │
//! │ Byte 4-7:   Timestamp (f32 seconds since Unix epoch, UTC)    │
//! │ Byte 8-9:   Device id (u16)                                  │
//! │ Byte 10-11: Flags (u16)  [0] SEQ present  [1] ACKSEQ present │
//! ├──────────────────────────────────────────────────────────────┤
//! │ [If SEQ flag]    Bytes 12-15: Sequence number (u32)          │
//! │ [If ACKSEQ flag] Next 4 bytes: Acked sequence number (u32)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload                                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The optional fields are read and written in one canonical order:
//! sequence number first, then acked sequence number.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::{PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};

/// Header size without optional sequence fields
pub const FIXED_HEADER_SIZE: usize = 12;

/// Size of each optional sequence field
pub const SEQ_FIELD_SIZE: usize = 4;

/// Packet message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    /// Empty packet, ack/round-trip timing only (never acked itself)
    Ack = 0,
    /// Client requests to join the audience (JSON roster payload)
    Join = 1,
    /// Server sets client config (JSON payload)
    Config = 2,
    /// Client leaves the audience (no payload)
    Unjoin = 3,
    /// Client roster state changed (bit-packed payload)
    Update = 4,
    /// Generic JSON data payload
    Data = 5,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MsgType::Ack),
            1 => Some(MsgType::Join),
            2 => Some(MsgType::Config),
            3 => Some(MsgType::Unjoin),
            4 => Some(MsgType::Update),
            5 => Some(MsgType::Data),
            _ => None,
        }
    }
}

/// Device id of a protocol endpoint.
///
/// `None` in a header models the unset sentinel and is not wire-valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Client id before the server has assigned one ("give me an id")
    pub const REQUEST: DeviceId = DeviceId(0);
    /// Well-known id of the server
    pub const SERVER: DeviceId = DeviceId(1);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub seq: bool,
    pub ack_seq: bool,
}

impl HeaderFlags {
    pub fn to_bits(self) -> u16 {
        let mut flags = 0u16;
        if self.seq {
            flags |= 0x01;
        }
        if self.ack_seq {
            flags |= 0x02;
        }
        flags
    }

    pub fn from_bits(bits: u16) -> Self {
        Self {
            seq: (bits & 0x01) != 0,
            ack_seq: (bits & 0x02) != 0,
        }
    }
}

/// A rollcall packet header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version_major: u8,
    pub version_minor: u8,
    /// Message type; `None` is the unset sentinel and fails to encode
    pub kind: Option<MsgType>,
    /// Sender device id; `None` is the unset sentinel and fails to encode
    pub device_id: Option<DeviceId>,
    /// Byte length of the payload that follows the header
    pub payload_length: u16,
    /// Seconds since the Unix epoch, UTC
    pub timestamp: f32,
    /// Present iff this packet wants an acknowledgement
    pub sequence: Option<u32>,
    /// Present iff this packet acknowledges a peer's sequence number
    pub ack_sequence: Option<u32>,
}

impl Header {
    /// Create a header of the given type, stamped with the current time
    pub fn new(kind: MsgType) -> Self {
        Self {
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
            kind: Some(kind),
            device_id: None,
            payload_length: 0,
            timestamp: unix_now(),
            sequence: None,
            ack_sequence: None,
        }
    }

    /// Refresh the timestamp to the current time (used on retransmit)
    pub fn touch(&mut self) {
        self.timestamp = unix_now();
    }

    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags {
            seq: self.sequence.is_some(),
            ack_seq: self.ack_sequence.is_some(),
        }
    }

    /// Total encoded size, including optional fields
    pub fn size(&self) -> usize {
        FIXED_HEADER_SIZE
            + self.sequence.map_or(0, |_| SEQ_FIELD_SIZE)
            + self.ack_sequence.map_or(0, |_| SEQ_FIELD_SIZE)
    }

    /// Encode the header into `buf`.
    ///
    /// Fails with [`Error::InvalidHeader`] when the message type or device
    /// id is still the unset sentinel.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let kind = self.kind.ok_or(Error::InvalidHeader("message type not set"))?;
        let device_id = self
            .device_id
            .ok_or(Error::InvalidHeader("device id not set"))?;

        buf.reserve(self.size());
        buf.put_u8((self.version_major << 4) | (self.version_minor & 0x0f));
        buf.put_u8(kind as u8);
        buf.put_u16(self.payload_length);
        buf.put_f32(self.timestamp);
        buf.put_u16(device_id.0);
        buf.put_u16(self.flags().to_bits());

        if let Some(seq) = self.sequence {
            buf.put_u32(seq);
        }
        if let Some(ack) = self.ack_sequence {
            buf.put_u32(ack);
        }
        Ok(())
    }

    /// Decode a header, returning it along with the remaining bytes.
    pub fn decode(mut buf: &[u8]) -> Result<(Self, &[u8])> {
        if buf.remaining() < FIXED_HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "header truncated: need {FIXED_HEADER_SIZE} bytes, have {}",
                buf.remaining()
            )));
        }

        let version = buf.get_u8();
        let kind_raw = buf.get_u8();
        let kind = MsgType::from_u8(kind_raw).ok_or(Error::UnknownMessageType(kind_raw))?;
        let payload_length = buf.get_u16();
        let timestamp = buf.get_f32();
        let device_id = buf.get_u16();
        let flags = HeaderFlags::from_bits(buf.get_u16());

        let optional = usize::from(flags.seq) + usize::from(flags.ack_seq);
        if buf.remaining() < optional * SEQ_FIELD_SIZE {
            return Err(Error::Protocol("header optional fields truncated".into()));
        }

        // Canonical order: sequence number, then acked sequence number.
        let sequence = flags.seq.then(|| buf.get_u32());
        let ack_sequence = flags.ack_seq.then(|| buf.get_u32());

        Ok((
            Self {
                version_major: version >> 4,
                version_minor: version & 0x0f,
                kind: Some(kind),
                device_id: Some(DeviceId(device_id)),
                payload_length,
                timestamp,
                sequence,
                ack_sequence,
            },
            buf,
        ))
    }
}

/// Current time as f32 seconds since the Unix epoch
pub fn unix_now() -> f32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() as f32)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> Header {
        let mut header = Header::new(MsgType::Update);
        header.device_id = Some(DeviceId(7));
        header
    }

    #[test]
    fn test_roundtrip_plain() {
        let header = valid_header();
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), FIXED_HEADER_SIZE);

        let (decoded, rest) = Header::decode(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_roundtrip_with_seq_and_ack() {
        let mut header = valid_header();
        header.sequence = Some(42);
        header.ack_sequence = Some(1_000_000);
        header.payload_length = 17;

        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), FIXED_HEADER_SIZE + 2 * SEQ_FIELD_SIZE);

        let (decoded, _) = Header::decode(&buf).unwrap();
        assert_eq!(decoded.sequence, Some(42));
        assert_eq!(decoded.ack_sequence, Some(1_000_000));
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_known_bytes() {
        // Reference vector: version 3.2, JOIN, server id, no payload,
        // timestamp 2015-07-13T11:23:33.437988Z.
        let mut header = Header::new(MsgType::Join);
        header.version_major = 3;
        header.version_minor = 2;
        header.device_id = Some(DeviceId::SERVER);
        header.timestamp = 1_436_786_613.437_988_f64 as f32;

        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x32, 0x01, 0x00, 0x00, 0x4e, 0xab, 0x47, 0x3f, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_device_id_not_set() {
        let header = Header::new(MsgType::Update);
        let mut buf = BytesMut::new();
        assert!(matches!(
            header.encode(&mut buf),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_encode_message_type_not_set() {
        let mut header = valid_header();
        header.kind = None;
        let mut buf = BytesMut::new();
        assert!(matches!(
            header.encode(&mut buf),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_truncated() {
        let header = valid_header();
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert!(matches!(
            Header::decode(&buf[..FIXED_HEADER_SIZE - 3]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_truncated_optional_fields() {
        let mut header = valid_header();
        header.sequence = Some(9);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert!(matches!(
            Header::decode(&buf[..FIXED_HEADER_SIZE + 1]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let header = valid_header();
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        buf[1] = 0x2a;
        assert!(matches!(
            Header::decode(&buf),
            Err(Error::UnknownMessageType(0x2a))
        ));
    }

    #[test]
    fn test_flags_roundtrip() {
        let flags = HeaderFlags {
            seq: true,
            ack_seq: false,
        };
        assert_eq!(HeaderFlags::from_bits(flags.to_bits()), flags);
        assert_eq!(flags.to_bits(), 0x01);
        assert_eq!(
            HeaderFlags::from_bits(0x03),
            HeaderFlags {
                seq: true,
                ack_seq: true
            }
        );
    }
}
