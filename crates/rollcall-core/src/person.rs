//! Tracked-person model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tracked person.
///
/// Clients use small integers for their local roster; once registered the
/// server mints composite string ids of the form `"<device_id>.<local_id>"`
/// for cross-system addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonId {
    Index(u64),
    Name(String),
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonId::Index(i) => i.fmt(f),
            PersonId::Name(s) => s.fmt(f),
        }
    }
}

impl From<u64> for PersonId {
    fn from(value: u64) -> Self {
        PersonId::Index(value)
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        PersonId::Name(value.to_string())
    }
}

impl From<String> for PersonId {
    fn from(value: String) -> Self {
        PersonId::Name(value)
    }
}

/// A tracked occupant with a boolean sitting state.
///
/// Persons are value-like: updates replace records, nothing mutates across
/// ownership boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: Option<PersonId>,
    pub sitting: bool,
}

impl Person {
    pub fn new(id: impl Into<PersonId>, sitting: bool) -> Self {
        Self {
            id: Some(id.into()),
            sitting,
        }
    }

    /// A person without identity (only valid inside a positional roster)
    pub fn anonymous(sitting: bool) -> Self {
        Self { id: None, sitting }
    }
}
