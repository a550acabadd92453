//! Rollcall Server
//!
//! The audience side of the rollcall presence protocol. A [`SensorServer`]
//! listens for JOINs (unicast and, by default, on the discovery multicast
//! group), assigns device ids, tracks every client's roster in a
//! [`Registry`], and notifies an [`Audience`] implementation about people
//! arriving, changing sitting state, and leaving.

pub mod audience;
pub mod error;
pub mod registry;
pub mod server;

pub use audience::{Audience, NoopAudience};
pub use error::{Result, ServerError};
pub use registry::{Registration, Registry};
pub use server::{SensorServer, ServerConfig};
