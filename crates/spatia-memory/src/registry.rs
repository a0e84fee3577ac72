use std::sync::Arc;

use tracing::info;

use spatia_core::access::AccessLevel;
use spatia_core::anchor::Anchor;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::{EntityKind, RefId, PUBLIC_ROOT, SYSTEM_ROOT};
use spatia_core::traits::Storage;

use crate::overlay::Overlay;

/// Owner of the reserved roots and the principal → root bindings.
///
/// One registry is shared by every context opened on the same store.
pub struct RootRegistry {
    storage: Arc<dyn Storage>,
}

impl RootRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn system_root(&self) -> RefId {
        SYSTEM_ROOT
    }

    pub fn public_root(&self) -> RefId {
        PUBLIC_ROOT
    }

    /// Default access given to a reserved root when it is first created.
    fn default_access(id: &RefId) -> AccessLevel {
        if *id == PUBLIC_ROOT {
            AccessLevel::Write
        } else {
            AccessLevel::NoAccess
        }
    }

    /// Load the root `id` into `overlay`, creating it in storage if absent.
    ///
    /// Idempotent: repeated calls never create a second anchor for the id.
    pub fn bootstrap(&self, overlay: &mut Overlay, id: &RefId) -> Result<()> {
        if let Some(anchor) = overlay.load(id)? {
            if !anchor.architype.is_root() {
                return Err(SpatiaError::KindMismatch {
                    id: id.to_string(),
                    expected: "root".into(),
                    actual: anchor.architype.type_name().to_string(),
                });
            }
            return Ok(());
        }

        let mut root = Anchor::new_root(*id, Self::default_access(id))?;
        self.storage.upsert(&root)?;
        root.sync_hash();
        info!(id = %id, "Root bootstrapped");
        overlay.insert(root);
        Ok(())
    }

    /// Root bound to `principal`, if registered.
    pub fn resolve(&self, principal: &str) -> Result<Option<RefId>> {
        self.storage.root_of(principal)
    }

    /// Return the principal's root, creating and binding a fresh one if needed.
    pub fn register(&self, principal: &str) -> Result<RefId> {
        if let Some(existing) = self.storage.root_of(principal)? {
            if self.storage.exists(&existing)? {
                return Ok(existing);
            }
        }

        let root = Anchor::new_root(RefId::generate(EntityKind::Node), AccessLevel::NoAccess)?;
        self.storage.upsert(&root)?;
        self.storage.bind_root(principal, &root.id)?;
        info!(principal, root = %root.id, "Principal registered");
        Ok(root.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use spatia_core::anchor::{Architype, Payload};

    #[test]
    fn test_bootstrap_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registry = RootRegistry::new(store.clone());

        for _ in 0..3 {
            let mut overlay = Overlay::new(store.clone());
            registry.bootstrap(&mut overlay, &SYSTEM_ROOT).unwrap();
            registry.bootstrap(&mut overlay, &PUBLIC_ROOT).unwrap();
            overlay.flush().unwrap();
        }
        assert_eq!(store.len(), 2);
        assert_eq!(store.write_count(), 2);

        let public = store.find_by_id(&PUBLIC_ROOT).unwrap().unwrap();
        assert_eq!(public.access.all, AccessLevel::Write);
        let system = store.find_by_id(&SYSTEM_ROOT).unwrap().unwrap();
        assert_eq!(system.access.all, AccessLevel::NoAccess);
    }

    #[test]
    fn test_bootstrap_rejects_non_root() {
        let store = Arc::new(MemoryStore::new());
        let mut imposter = Anchor::new(Architype::node(Payload::new("City")), SYSTEM_ROOT);
        imposter.id = PUBLIC_ROOT;
        store.upsert(&imposter).unwrap();

        let registry = RootRegistry::new(store.clone());
        let mut overlay = Overlay::new(store);
        assert!(matches!(
            registry.bootstrap(&mut overlay, &PUBLIC_ROOT),
            Err(SpatiaError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_register_binds_once() {
        let store = Arc::new(MemoryStore::new());
        let registry = RootRegistry::new(store.clone());
        assert!(registry.resolve("alice").unwrap().is_none());

        let first = registry.register("alice").unwrap();
        let again = registry.register("alice").unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.resolve("alice").unwrap(), Some(first));

        let root = store.find_by_id(&first).unwrap().unwrap();
        assert!(root.architype.is_root());
        assert_eq!(root.access.all, AccessLevel::NoAccess);

        let bob = registry.register("bob").unwrap();
        assert_ne!(bob, first);
    }
}
