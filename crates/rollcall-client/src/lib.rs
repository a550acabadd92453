//! Rollcall Client
//!
//! The sensor-side engine of the rollcall presence protocol. A
//! [`SensorClient`] binds a transport endpoint, joins a server's audience
//! (by unicast address or multicast discovery), and then streams bit-packed
//! sitting-state updates for its roster until it unjoins.

pub mod client;
pub mod error;

pub use client::{ClientConfig, ConfigCallback, SensorClient};
pub use error::{ClientError, Result};
