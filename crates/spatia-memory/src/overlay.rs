//! Per-context overlay over a [`Storage`] backend.
//!
//! Every anchor touched by a context is materialized here once and then read
//! and written in place. Nothing reaches storage until [`Overlay::flush`],
//! which commits the whole change set as one atomic batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use spatia_core::anchor::Anchor;
use spatia_core::error::Result;
use spatia_core::id::RefId;
use spatia_core::traits::{Storage, WriteOp};

/// Counters reported by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Fresh anchors that were unreachable and therefore not committed.
    pub discarded: usize,
}

pub struct Overlay {
    storage: Arc<dyn Storage>,
    anchors: HashMap<RefId, Anchor>,
    /// Destroyed in this context; stored ones are deleted on flush.
    removed: HashSet<RefId>,
}

impl Overlay {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            anchors: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Materialize `id`, loading it from storage on a cache miss.
    /// Returns whether the anchor exists.
    pub fn ensure(&mut self, id: &RefId) -> Result<bool> {
        if self.removed.contains(id) {
            return Ok(false);
        }
        if self.anchors.contains_key(id) {
            return Ok(true);
        }
        match self.storage.find_by_id(id)? {
            Some(mut anchor) => {
                trace!(id = %id, "Anchor loaded into overlay");
                anchor.state.connected = true;
                self.anchors.insert(*id, anchor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn load(&mut self, id: &RefId) -> Result<Option<&Anchor>> {
        self.ensure(id)?;
        Ok(self.anchors.get(id))
    }

    pub fn load_mut(&mut self, id: &RefId) -> Result<Option<&mut Anchor>> {
        self.ensure(id)?;
        Ok(self.anchors.get_mut(id))
    }

    /// Cached anchor only; never touches storage.
    pub fn get(&self, id: &RefId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    pub fn get_mut(&mut self, id: &RefId) -> Option<&mut Anchor> {
        self.anchors.get_mut(id)
    }

    /// Add an anchor created in this context.
    pub fn insert(&mut self, mut anchor: Anchor) {
        anchor.state.connected = true;
        self.removed.remove(&anchor.id);
        self.anchors.insert(anchor.id, anchor);
    }

    /// Drop an anchor from the graph. Stored anchors are deleted on flush.
    pub fn remove(&mut self, id: &RefId) -> Option<Anchor> {
        self.removed.insert(*id);
        self.anchors.remove(id).map(|mut anchor| {
            anchor.state.connected = false;
            anchor
        })
    }

    /// Mark an anchor persistent regardless of reachability.
    pub fn persist(&mut self, id: &RefId) -> Result<bool> {
        match self.load_mut(id)? {
            Some(anchor) => {
                anchor.persistent = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Fresh anchors reachable from a persistent node through cached edges.
    fn promotions(&self) -> HashSet<RefId> {
        let mut promoted = HashSet::new();
        let mut seen: HashSet<RefId> = HashSet::new();
        let mut queue: VecDeque<RefId> = self
            .anchors
            .values()
            .filter(|a| a.persistent && a.architype.is_node())
            .map(|a| a.id)
            .collect();
        seen.extend(queue.iter().copied());

        while let Some(node_id) = queue.pop_front() {
            let edges = match self.anchors.get(&node_id).and_then(|a| a.architype.as_node()) {
                Some(node) => node.edges.clone(),
                None => continue,
            };
            for edge_id in edges {
                let Some(edge_anchor) = self.anchors.get(&edge_id) else {
                    continue;
                };
                if !edge_anchor.persistent {
                    promoted.insert(edge_id);
                }
                let Some(edge) = edge_anchor.architype.as_edge() else {
                    continue;
                };
                for end in [edge.source, edge.target] {
                    if !seen.insert(end) {
                        continue;
                    }
                    if let Some(anchor) = self.anchors.get(&end) {
                        if !anchor.persistent {
                            promoted.insert(end);
                        }
                        queue.push_back(end);
                    }
                }
            }
        }
        promoted
    }

    /// Commit the overlay as one atomic batch.
    ///
    /// On error nothing in storage or in the overlay has changed.
    pub fn flush(&mut self) -> Result<FlushStats> {
        let promoted = self.promotions();

        let mut ops = Vec::new();
        let mut upserted = Vec::new();
        for id in &self.removed {
            ops.push(WriteOp::Delete(*id));
        }

        let mut discarded = 0;
        for anchor in self.anchors.values() {
            let persistent = anchor.persistent || promoted.contains(&anchor.id);
            if !persistent {
                discarded += 1;
                continue;
            }
            let mut staged = anchor.clone();
            staged.persistent = true;
            if staged.is_dirty() {
                upserted.push(staged.id);
                ops.push(WriteOp::Upsert(staged));
            }
        }

        let stats = if ops.is_empty() {
            Default::default()
        } else {
            self.storage.apply(&ops)?
        };

        for id in &upserted {
            if let Some(anchor) = self.anchors.get_mut(id) {
                anchor.persistent = true;
                anchor.sync_hash();
            }
        }
        self.removed.clear();

        let result = FlushStats {
            written: stats.written,
            unchanged: stats.unchanged,
            deleted: stats.deleted,
            discarded,
        };
        debug!(
            written = result.written,
            unchanged = result.unchanged,
            deleted = result.deleted,
            discarded = result.discarded,
            "Overlay flushed"
        );
        Ok(result)
    }

    /// Drop every cached anchor without writing anything.
    pub fn discard(&mut self) {
        debug!(cached = self.anchors.len(), "Overlay discarded");
        self.anchors.clear();
        self.removed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use spatia_core::access::AccessLevel;
    use spatia_core::anchor::{Architype, Payload};
    use spatia_core::id::PUBLIC_ROOT;

    fn setup() -> (Arc<MemoryStore>, Overlay) {
        let store = Arc::new(MemoryStore::new());
        let mut root = Anchor::new_root(PUBLIC_ROOT, AccessLevel::Write).unwrap();
        store.upsert(&root).unwrap();
        root.sync_hash();
        let mut overlay = Overlay::new(store.clone());
        overlay.insert(root);
        (store, overlay)
    }

    /// Wire an edge between two cached nodes the way connect does.
    fn link(overlay: &mut Overlay, from: RefId, to: RefId) -> RefId {
        let edge = Anchor::new(Architype::edge(Payload::new("Link"), from, to), PUBLIC_ROOT);
        let id = edge.id;
        overlay.insert(edge);
        for end in [from, to] {
            overlay
                .get_mut(&end)
                .and_then(|a| a.architype.as_node_mut())
                .unwrap()
                .edges
                .push(id);
        }
        id
    }

    fn fresh_node(overlay: &mut Overlay, name: &str) -> RefId {
        let anchor = Anchor::new(Architype::node(Payload::new(name)), PUBLIC_ROOT);
        let id = anchor.id;
        overlay.insert(anchor);
        id
    }

    #[test]
    fn test_reachable_fresh_anchors_are_committed() {
        let (store, mut overlay) = setup();
        let a = fresh_node(&mut overlay, "A");
        let b = fresh_node(&mut overlay, "B");
        let e1 = link(&mut overlay, PUBLIC_ROOT, a);
        let e2 = link(&mut overlay, a, b);

        let stats = overlay.flush().unwrap();
        assert_eq!(stats.discarded, 0);
        for id in [a, b, e1, e2, PUBLIC_ROOT] {
            assert!(store.exists(&id).unwrap(), "{} missing", id);
        }
        assert!(overlay.get(&b).unwrap().persistent);
    }

    #[test]
    fn test_unreachable_fresh_anchors_are_discarded() {
        let (store, mut overlay) = setup();
        let island = fresh_node(&mut overlay, "Island");
        let other = fresh_node(&mut overlay, "Other");
        let edge = link(&mut overlay, island, other);

        let stats = overlay.flush().unwrap();
        assert_eq!(stats.discarded, 3);
        assert!(!store.exists(&island).unwrap());
        assert!(!store.exists(&edge).unwrap());
    }

    #[test]
    fn test_explicit_persist() {
        let (store, mut overlay) = setup();
        let lonely = fresh_node(&mut overlay, "Lonely");
        assert!(overlay.persist(&lonely).unwrap());
        overlay.flush().unwrap();
        assert!(store.exists(&lonely).unwrap());
    }

    #[test]
    fn test_second_flush_writes_nothing() {
        let (store, mut overlay) = setup();
        let a = fresh_node(&mut overlay, "A");
        link(&mut overlay, PUBLIC_ROOT, a);

        overlay.flush().unwrap();
        let writes = store.write_count();
        let stats = overlay.flush().unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn test_load_through_and_remove() {
        let (store, mut overlay) = setup();
        let a = fresh_node(&mut overlay, "A");
        link(&mut overlay, PUBLIC_ROOT, a);
        overlay.flush().unwrap();

        let mut next = Overlay::new(store.clone());
        assert!(next.get(&a).is_none());
        assert!(next.load(&a).unwrap().is_some());
        assert!(next.get(&a).unwrap().state.connected);

        next.remove(&a);
        assert!(next.load(&a).unwrap().is_none());
        let stats = next.flush().unwrap();
        assert_eq!(stats.deleted, 1);
        assert!(!store.exists(&a).unwrap());
    }

    #[test]
    fn test_discard_writes_nothing() {
        let (store, mut overlay) = setup();
        let a = fresh_node(&mut overlay, "A");
        link(&mut overlay, PUBLIC_ROOT, a);
        let before = store.write_count();
        overlay.discard();
        assert!(overlay.is_empty());
        assert_eq!(store.write_count(), before);
        assert!(!store.exists(&a).unwrap());
    }
}
