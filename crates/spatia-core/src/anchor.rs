//! Anchor / Architype split.
//!
//! An [`Anchor`] is the persistent envelope of a graph entity: identity,
//! ownership, access record and persistence flags. The [`Architype`] it wraps
//! is the user payload plus the structural links of its variant (attached
//! edges for nodes, endpoints for edges, traversal state for walkers).
//! Cross-entity relationships are always reference ids, never pointers.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::access::{Access, AccessLevel};
use crate::error::{Result, SpatiaError};
use crate::id::{EntityKind, RefId, SYSTEM_ROOT};

/// Type name carried by root architypes.
pub const ROOT_TYPE: &str = "Root";

/// User-defined payload: a type name plus named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Set a field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.fields.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeArchitype {
    pub payload: Payload,
    /// Attached edges in connection order.
    #[serde(default)]
    pub edges: Vec<RefId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeArchitype {
    pub payload: Payload,
    pub source: RefId,
    pub target: RefId,
    #[serde(default)]
    pub undirected: bool,
}

impl EdgeArchitype {
    /// The endpoint opposite `node`, if `node` is one of the endpoints.
    pub fn opposite(&self, node: &RefId) -> Option<RefId> {
        if self.source == *node {
            Some(self.target)
        } else if self.target == *node {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Lifecycle of a walker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalkerStatus {
    #[default]
    Spawned,
    Running,
    Disengaged,
    Complete,
}

impl WalkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disengaged | Self::Complete)
    }
}

impl std::fmt::Display for WalkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawned => write!(f, "SPAWNED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Disengaged => write!(f, "DISENGAGED"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalkerArchitype {
    pub payload: Payload,
    #[serde(default)]
    pub status: WalkerStatus,
    #[serde(default)]
    pub position: Option<RefId>,
    /// Pending destinations, dequeued from the front.
    #[serde(default)]
    pub frontier: VecDeque<RefId>,
    #[serde(default)]
    pub ignores: Vec<RefId>,
    /// Nodes entered so far, in order.
    #[serde(default)]
    pub path: Vec<RefId>,
    #[serde(default)]
    pub disengaged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectArchitype {
    pub payload: Payload,
}

/// Tagged union over the entity variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum Architype {
    Root(NodeArchitype),
    Node(NodeArchitype),
    Edge(EdgeArchitype),
    Walker(WalkerArchitype),
    Object(ObjectArchitype),
}

impl Architype {
    pub fn root() -> Self {
        Self::Root(NodeArchitype {
            payload: Payload::new(ROOT_TYPE),
            edges: Vec::new(),
        })
    }

    pub fn node(payload: Payload) -> Self {
        Self::Node(NodeArchitype {
            payload,
            edges: Vec::new(),
        })
    }

    pub fn edge(payload: Payload, source: RefId, target: RefId) -> Self {
        Self::Edge(EdgeArchitype {
            payload,
            source,
            target,
            undirected: false,
        })
    }

    pub fn walker(payload: Payload) -> Self {
        Self::Walker(WalkerArchitype {
            payload,
            ..Default::default()
        })
    }

    pub fn object(payload: Payload) -> Self {
        Self::Object(ObjectArchitype { payload })
    }

    /// Reference-id kind this variant must be stored under.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Root(_) | Self::Node(_) => EntityKind::Node,
            Self::Edge(_) => EntityKind::Edge,
            Self::Walker(_) => EntityKind::Walker,
            Self::Object(_) => EntityKind::Object,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Root(_) | Self::Node(_))
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Self::Root(n) | Self::Node(n) => &n.payload,
            Self::Edge(e) => &e.payload,
            Self::Walker(w) => &w.payload,
            Self::Object(o) => &o.payload,
        }
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        match self {
            Self::Root(n) | Self::Node(n) => &mut n.payload,
            Self::Edge(e) => &mut e.payload,
            Self::Walker(w) => &mut w.payload,
            Self::Object(o) => &mut o.payload,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.payload().type_name
    }

    pub fn as_node(&self) -> Option<&NodeArchitype> {
        match self {
            Self::Root(n) | Self::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut NodeArchitype> {
        match self {
            Self::Root(n) | Self::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&EdgeArchitype> {
        match self {
            Self::Edge(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_walker(&self) -> Option<&WalkerArchitype> {
        match self {
            Self::Walker(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_walker_mut(&mut self) -> Option<&mut WalkerArchitype> {
        match self {
            Self::Walker(w) => Some(w),
            _ => None,
        }
    }
}

/// Per-context materialization state. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorState {
    /// Materialized in the current context's overlay.
    pub connected: bool,
    /// Content hash as of the last load or commit; `None` if never stored.
    pub hash: Option<String>,
}

/// Persistent envelope for every graph entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: RefId,
    /// Owning principal root. `None` for roots, which own themselves.
    #[serde(default)]
    pub root: Option<RefId>,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub persistent: bool,
    pub architype: Architype,
    #[serde(skip)]
    pub state: AnchorState,
}

impl Anchor {
    /// Create a fresh, non-persistent anchor owned by `owner`.
    pub fn new(architype: Architype, owner: RefId) -> Self {
        Self {
            id: RefId::generate(architype.kind()),
            root: Some(owner),
            access: Access::default(),
            persistent: false,
            architype,
            state: AnchorState {
                connected: true,
                hash: None,
            },
        }
    }

    /// Create a persistent root anchor with a fixed id.
    pub fn new_root(id: RefId, all: AccessLevel) -> Result<Self> {
        let anchor = Self {
            id,
            root: None,
            access: Access::with_all(all),
            persistent: true,
            architype: Architype::root(),
            state: AnchorState {
                connected: true,
                hash: None,
            },
        };
        anchor.validate()?;
        Ok(anchor)
    }

    /// Check the kind/architype invariant.
    pub fn validate(&self) -> Result<()> {
        if self.id.kind() != self.architype.kind() {
            return Err(SpatiaError::KindMismatch {
                id: self.id.to_string(),
                expected: self.id.kind().to_string(),
                actual: self.architype.kind().to_string(),
            });
        }
        Ok(())
    }

    pub fn owner(&self) -> Option<&RefId> {
        self.root.as_ref()
    }

    /// Effective access level of `principal` on this anchor.
    pub fn access_for(&self, principal: &RefId) -> AccessLevel {
        if *principal == SYSTEM_ROOT || *principal == self.id {
            return AccessLevel::Admin;
        }
        self.access.resolve(principal, self.owner())
    }

    /// SHA-256 over the persisted serialization, as lowercase hex.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Record the current content as the stored version.
    pub fn sync_hash(&mut self) {
        self.state.hash = Some(self.content_hash());
    }

    /// Whether the current content differs from the stored version.
    pub fn is_dirty(&self) -> bool {
        self.state.hash.as_deref() != Some(self.content_hash().as_str())
    }

    /// Whether a version of this anchor was ever stored.
    pub fn is_stored(&self) -> bool {
        self.state.hash.is_some()
    }

    /// Decode a stored anchor and mark it as synced.
    pub fn from_stored(body: &str) -> Result<Self> {
        let mut anchor: Anchor = serde_json::from_str(body)?;
        anchor.validate()?;
        anchor.state.connected = true;
        anchor.sync_hash();
        Ok(anchor)
    }

    /// Encode for storage.
    pub fn to_stored(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PUBLIC_ROOT;

    #[test]
    fn new_anchor_kind_matches_architype() {
        let owner = PUBLIC_ROOT;
        let node = Anchor::new(Architype::node(Payload::new("City")), owner);
        assert_eq!(node.id.kind(), EntityKind::Node);
        assert!(!node.persistent);
        assert!(node.validate().is_ok());

        let walker = Anchor::new(Architype::walker(Payload::new("Tour")), owner);
        assert_eq!(walker.id.kind(), EntityKind::Walker);
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let mut anchor = Anchor::new(Architype::node(Payload::new("City")), PUBLIC_ROOT);
        anchor.id = RefId::generate(EntityKind::Edge);
        assert!(matches!(
            anchor.validate(),
            Err(SpatiaError::KindMismatch { .. })
        ));
    }

    #[test]
    fn roots_are_node_kind() {
        let root = Anchor::new_root(PUBLIC_ROOT, AccessLevel::Write).unwrap();
        assert!(root.architype.is_root());
        assert!(root.persistent);
        assert_eq!(root.architype.type_name(), ROOT_TYPE);
        assert_eq!(root.access_for(&PUBLIC_ROOT), AccessLevel::Admin);

        let walker_id = RefId::generate(EntityKind::Walker);
        assert!(Anchor::new_root(walker_id, AccessLevel::Write).is_err());
    }

    #[test]
    fn owner_and_system_root_are_admin() {
        let owner = RefId::generate(EntityKind::Node);
        let stranger = RefId::generate(EntityKind::Node);
        let node = Anchor::new(Architype::node(Payload::new("Secret")), owner);
        assert_eq!(node.access_for(&owner), AccessLevel::Admin);
        assert_eq!(node.access_for(&SYSTEM_ROOT), AccessLevel::Admin);
        assert_eq!(node.access_for(&stranger), AccessLevel::NoAccess);
    }

    #[test]
    fn hash_tracks_content_not_state() {
        let mut node = Anchor::new(
            Architype::node(Payload::new("City").with("name", "Oslo")),
            PUBLIC_ROOT,
        );
        assert!(node.is_dirty());
        node.sync_hash();
        assert!(!node.is_dirty());

        node.state.connected = false;
        assert!(!node.is_dirty());

        node.architype.payload_mut().set("name", "Bergen");
        assert!(node.is_dirty());
    }

    #[test]
    fn stored_form_validates() {
        let node = Anchor::new(Architype::node(Payload::new("City")), PUBLIC_ROOT);
        let body = node.to_stored().unwrap();
        let loaded = Anchor::from_stored(&body).unwrap();
        assert_eq!(loaded.id, node.id);
        assert!(loaded.is_stored());
        assert!(!loaded.is_dirty());

        let tampered = body.replacen("\"n::", "\"e::", 1);
        assert!(Anchor::from_stored(&tampered).is_err());
    }

    #[test]
    fn edge_opposite() {
        let a = RefId::generate(EntityKind::Node);
        let b = RefId::generate(EntityKind::Node);
        let edge = EdgeArchitype {
            payload: Payload::new("Road"),
            source: a,
            target: b,
            undirected: false,
        };
        assert_eq!(edge.opposite(&a), Some(b));
        assert_eq!(edge.opposite(&b), Some(a));
        assert_eq!(edge.opposite(&PUBLIC_ROOT), None);
    }
}
