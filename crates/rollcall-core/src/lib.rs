//! Rollcall Core
//!
//! Wire codec and core types for the rollcall presence protocol.
//!
//! This crate provides:
//! - The packet header layout ([`Header`], [`MsgType`], [`DeviceId`])
//! - The closed message sum type and its payloads ([`Message`])
//! - Self-delimiting bit-packed roster encoding ([`roster`])
//! - The tracked-person model ([`Person`], [`PersonId`])
//!
//! Pure encode/decode; all I/O lives in `rollcall-transport`.

use std::net::Ipv4Addr;

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod person;
pub mod roster;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use header::{DeviceId, Header, HeaderFlags, MsgType};
pub use message::{ConfigPayload, JoinPayload, Message};
pub use person::{Person, PersonId};

/// Protocol version, major part
pub const PROTOCOL_VERSION_MAJOR: u8 = 1;

/// Protocol version, minor part
pub const PROTOCOL_VERSION_MINOR: u8 = 0;

/// Multicast group clients use to discover a server
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 136, 245);

/// Port the server listens on for multicast JOINs
pub const DEFAULT_MULTICAST_PORT: u16 = 2345;

/// Default unicast listen port
pub const DEFAULT_LISTEN_PORT: u16 = 2346;
