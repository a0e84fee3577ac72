use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use spatia_core::anchor::Anchor;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::RefId;
use spatia_core::traits::{CommitStats, Storage, UpsertOutcome, WriteOp};

#[derive(Default)]
struct Inner {
    /// Encoded body and content hash per anchor.
    anchors: HashMap<RefId, (String, String)>,
    principals: HashMap<String, RefId>,
    writes: usize,
}

impl Inner {
    fn upsert(&mut self, id: RefId, body: String, hash: String) -> UpsertOutcome {
        let outcome = match self.anchors.get(&id) {
            Some((_, stored)) if *stored == hash => return UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        self.anchors.insert(id, (body, hash));
        self.writes += 1;
        outcome
    }
}

/// Process-local store. Anchors are kept encoded so every load yields a
/// fresh copy, exactly like a database round trip.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored anchors.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.anchors.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of physical writes performed (inserts and updates).
    pub fn write_count(&self) -> usize {
        self.inner.lock().map(|i| i.writes).unwrap_or(0)
    }
}

impl Storage for MemoryStore {
    fn find_by_id(&self, id: &RefId) -> Result<Option<Anchor>> {
        let inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        match inner.anchors.get(id) {
            Some((body, _)) => Anchor::from_stored(body)
                .map(Some)
                .map_err(|e| SpatiaError::CorruptAnchor {
                    id: id.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn upsert(&self, anchor: &Anchor) -> Result<UpsertOutcome> {
        let body = anchor.to_stored()?;
        let mut inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(inner.upsert(anchor.id, body, anchor.content_hash()))
    }

    fn exists(&self, id: &RefId) -> Result<bool> {
        let inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(inner.anchors.contains_key(id))
    }

    fn delete(&self, id: &RefId) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(inner.anchors.remove(id).is_some())
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<CommitStats> {
        // Encode everything before taking the lock so a failure leaves the
        // store untouched.
        let mut encoded = Vec::with_capacity(ops.len());
        for op in ops {
            encoded.push(match op {
                WriteOp::Upsert(anchor) => Some((anchor.to_stored()?, anchor.content_hash())),
                WriteOp::Delete(_) => None,
            });
        }

        let mut inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        let mut stats = CommitStats::default();
        for (op, body) in ops.iter().zip(encoded) {
            match (op, body) {
                (WriteOp::Upsert(anchor), Some((body, hash))) => {
                    match inner.upsert(anchor.id, body, hash) {
                        UpsertOutcome::Unchanged => stats.unchanged += 1,
                        _ => stats.written += 1,
                    }
                }
                (WriteOp::Delete(id), _) => {
                    if inner.anchors.remove(id).is_some() {
                        stats.deleted += 1;
                    }
                }
                (WriteOp::Upsert(_), None) => {}
            }
        }
        debug!(
            written = stats.written,
            unchanged = stats.unchanged,
            deleted = stats.deleted,
            "Batch committed"
        );
        Ok(stats)
    }

    fn root_of(&self, principal: &str) -> Result<Option<RefId>> {
        let inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        Ok(inner.principals.get(principal).copied())
    }

    fn bind_root(&self, principal: &str, root: &RefId) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|e| SpatiaError::Database(e.to_string()))?;
        inner.principals.insert(principal.to_string(), *root);
        Ok(())
    }
}
