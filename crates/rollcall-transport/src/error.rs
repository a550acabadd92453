//! Transport error types

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Listen socket could not be bound (fatal to startup)
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Multicast socket setup or group join failed (fatal to startup)
    #[error("multicast join failed: {0}")]
    MulticastJoin(#[source] std::io::Error),

    /// A datagram could not be transmitted
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Outgoing packet failed to encode (the send is dropped, not retried)
    #[error(transparent)]
    Codec(#[from] rollcall_core::Error),
}
