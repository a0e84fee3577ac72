use crate::anchor::Anchor;
use crate::error::Result;
use crate::id::RefId;

/// Outcome of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Stored content hash already matched; nothing written.
    Unchanged,
}

/// One operation of an atomic write batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Upsert(Anchor),
    Delete(RefId),
}

/// Counters reported after a batch commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Persistence backend for anchors.
///
/// Implementations must serialize conflicting writes to the same anchor
/// (last committed wins) and must never return a partially decoded anchor.
pub trait Storage: Send + Sync + 'static {
    /// Load an anchor by id. `Ok(None)` when absent.
    fn find_by_id(&self, id: &RefId) -> Result<Option<Anchor>>;

    /// Write an anchor. Writing identical content twice stores one version.
    fn upsert(&self, anchor: &Anchor) -> Result<UpsertOutcome>;

    /// Whether an anchor with this id is stored.
    fn exists(&self, id: &RefId) -> Result<bool>;

    /// Remove an anchor. Returns whether anything was deleted.
    fn delete(&self, id: &RefId) -> Result<bool>;

    /// Apply a batch atomically: either every op is committed or none is.
    fn apply(&self, ops: &[WriteOp]) -> Result<CommitStats>;

    /// Root bound to a principal, if any.
    fn root_of(&self, principal: &str) -> Result<Option<RefId>>;

    /// Bind a principal to its root.
    fn bind_root(&self, principal: &str, root: &RefId) -> Result<()>;
}
