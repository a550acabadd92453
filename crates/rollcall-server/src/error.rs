//! Server error types

use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// `start` was called twice
    #[error("server already started")]
    AlreadyStarted,

    /// An operation that needs a running endpoint was called before `start`
    #[error("server not started")]
    NotStarted,

    #[error(transparent)]
    Transport(#[from] rollcall_transport::TransportError),
}
