//! Rollcall Transport
//!
//! UDP datagram transport with application-level acknowledgement and
//! retransmission. An [`Endpoint`] owns one unicast socket (plus, for
//! servers, one multicast socket joined to the discovery group), runs a
//! multiplexed receive loop that feeds a decoded-message inbox, auto-acks
//! sequenced packets, and retries unacknowledged sends a bounded number of
//! times.

pub mod endpoint;
pub mod error;
mod multicast;

pub use endpoint::{Endpoint, EndpointConfig, Inbound};
pub use error::{Result, TransportError};
