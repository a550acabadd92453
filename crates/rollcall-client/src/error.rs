//! Client error types

use rollcall_core::PersonId;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// `start` was called twice
    #[error("client already started")]
    AlreadyStarted,

    /// An operation that needs a running endpoint was called before `start`
    #[error("client not started")]
    NotStarted,

    /// A join was attempted with an empty roster
    #[error("cannot join with an empty roster")]
    EmptyRoster,

    /// A roster person has no id
    #[error("every person in the roster needs an id to join")]
    MissingId,

    /// Two roster people share an id
    #[error("duplicate person id in roster: {0}")]
    DuplicateId(PersonId),

    /// No CONFIG arrived within the join retry budget
    #[error("no server answered the join after {attempts} attempts")]
    JoinTimeout { attempts: u32 },

    /// `update` or `unjoin` was called before a join completed
    #[error("not joined to a server")]
    NotJoined,

    #[error(transparent)]
    Transport(#[from] rollcall_transport::TransportError),
}
