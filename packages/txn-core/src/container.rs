//! External collaborator contract: the row-storage container that backs a
//! session's transaction. Row storage itself (`BaseContainer` in spec.md
//! §1) is out of scope for the core; only this commit/abort seam is.

use crate::session::Session;

/// Called by `Partition::commit`/`Partition::abort` just before the
/// in-core transaction state transitions to `INACTIVE`. Implementations
/// must be idempotent with respect to being invoked on a session whose
/// transaction is already ending (spec.md §6).
pub trait ContainerCollaborator: Send + Sync {
    fn commit(&self, session: &Session) -> anyhow::Result<()>;
    fn abort(&self, session: &Session) -> anyhow::Result<()>;
}

/// No-op collaborator, useful for tests and for callers that only need the
/// session/transaction bookkeeping without a real storage engine behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullContainerCollaborator;

impl ContainerCollaborator for NullContainerCollaborator {
    fn commit(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }

    fn abort(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }
}
