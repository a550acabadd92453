//! Error types for the rollcall wire codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error types
#[derive(Error, Debug)]
pub enum Error {
    /// Encode-time header invariant violation (fatal to that send, never retried)
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// Unrecognized message type code on the wire
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Decode-time or semantic wire inconsistency; the datagram is dropped
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Malformed JSON payload
    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),
}
