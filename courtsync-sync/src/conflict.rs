//! Conflict resolution between a dirty local row and its remote counterpart.
//!
//! Resolution is whole-record: the losing side's field edits are dropped even
//! when the two writers touched disjoint fields. Swap in another
//! [`ConflictPolicy`] for a finer merge.

use courtsync_core::entity::{Entity, SyncableEntity};

/// Which side a policy kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

pub trait ConflictPolicy: Send + Sync {
    /// Pick the version to keep. Both arguments share `(kind, id)`.
    fn resolve(&self, local: &Entity, remote: &Entity) -> Winner;
}

/// Later `updated_at` wins; ties go to the remote.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictPolicy for LastWriterWins {
    fn resolve(&self, local: &Entity, remote: &Entity) -> Winner {
        if local.meta().updated_at > remote.meta().updated_at {
            Winner::Local
        } else {
            Winner::Remote
        }
    }
}

/// Apply `policy` and return the entity to keep.
pub fn resolve(policy: &dyn ConflictPolicy, local: Entity, remote: Entity) -> Entity {
    match policy.resolve(&local, &remote) {
        Winner::Local => local,
        Winner::Remote => remote,
    }
}
