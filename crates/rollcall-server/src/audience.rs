//! Audience notification interface
//!
//! The server reports roster changes through this trait. Implementations
//! receive persons with their server-minted composite ids
//! (`"<device_id>.<local_id>"`), so ids stay unique across clients.

use rollcall_core::Person;

/// Receives presence changes from the server.
///
/// Callbacks run on the server's dispatch task; keep them quick. A failed
/// `on_person_new` aborts the join that triggered it, the other callbacks'
/// errors are logged and dispatch continues.
pub trait Audience: Send + Sync {
    /// People newly tracked because their client joined
    fn on_person_new(&self, people: &[Person]) -> anyhow::Result<()>;

    /// People whose sitting state changed; only changed people are passed
    fn on_person_update(&self, people: &[Person]) -> anyhow::Result<()>;

    /// People no longer tracked because their client unjoined
    fn on_person_leave(&self, people: &[Person]) -> anyhow::Result<()>;
}

/// An audience that ignores everything
#[derive(Debug, Default)]
pub struct NoopAudience;

impl Audience for NoopAudience {
    fn on_person_new(&self, _people: &[Person]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_person_update(&self, _people: &[Person]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_person_leave(&self, _people: &[Person]) -> anyhow::Result<()> {
        Ok(())
    }
}
