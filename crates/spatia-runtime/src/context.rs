//! Per-request execution context.
//!
//! A context owns the overlay for one logical caller. It bootstraps the
//! reserved roots, resolves the caller's working root and entry node, and
//! exposes every graph mutation as an access-checked operation. Nothing is
//! written to storage until [`ExecutionContext::close`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use spatia_core::access::AccessLevel;
use spatia_core::anchor::{Anchor, Architype, EdgeArchitype, NodeArchitype, Payload};
use spatia_core::config::RuntimeConfig;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::{EntityKind, RefId};
use spatia_core::traits::Storage;
use spatia_core::value::{Record, Value};
use spatia_memory::{FlushStats, Overlay, RootRegistry};

use crate::filter::{EdgeFilter, EdgeSpec};
use crate::response::{Projector, Response};

/// Status of a context that has not observed a reference or storage error.
pub const STATUS_OK: u16 = 200;

/// Who is calling and where traversal starts.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    /// Principal name; anonymous callers work under the public root.
    pub principal: Option<String>,
    /// Entry node reference; defaults to the working root.
    pub entry: Option<String>,
}

impl ContextRequest {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_principal(name: impl Into<String>) -> Self {
        Self {
            principal: Some(name.into()),
            entry: None,
        }
    }

    pub fn at(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }
}

pub struct ExecutionContext {
    overlay: Overlay,
    registry: Arc<RootRegistry>,
    config: RuntimeConfig,
    /// Root id the caller is identified by for access checks.
    principal: RefId,
    root: RefId,
    entry: RefId,
    reports: Vec<Value>,
    status: u16,
    closed: bool,
    /// Set once a storage error was observed; close then discards.
    poisoned: bool,
}

impl ExecutionContext {
    pub fn create(
        storage: Arc<dyn Storage>,
        registry: Arc<RootRegistry>,
        request: ContextRequest,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let mut overlay = Overlay::new(storage);
        registry.bootstrap(&mut overlay, &registry.system_root())?;

        let bound = match request.principal.as_deref() {
            Some(name) => registry.resolve(name)?,
            None => None,
        };
        let root = match bound {
            Some(id) if overlay.ensure(&id)? => id,
            other => {
                if let Some(id) = other {
                    warn!(root = %id, "Bound root missing, falling back to public root");
                }
                let public = registry.public_root();
                registry.bootstrap(&mut overlay, &public)?;
                public
            }
        };

        let entry = match request.entry.as_deref() {
            Some(raw) => resolve_entry(&mut overlay, raw)?,
            None => root,
        };

        debug!(
            principal = request.principal.as_deref().unwrap_or("<anonymous>"),
            root = %root,
            entry = %entry,
            "Context created"
        );

        Ok(Self {
            overlay,
            registry,
            config,
            principal: root,
            root,
            entry,
            reports: Vec::new(),
            status: STATUS_OK,
            closed: false,
            poisoned: false,
        })
    }

    pub fn principal(&self) -> RefId {
        self.principal
    }

    pub fn root_id(&self) -> RefId {
        self.root
    }

    pub fn entry_id(&self) -> RefId {
        self.entry
    }

    pub fn system_root(&self) -> RefId {
        self.registry.system_root()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn reports(&self) -> &[Value] {
        &self.reports
    }

    /// Append a value to the report buffer.
    pub fn report(&mut self, value: impl Into<Value>) {
        self.reports.push(value.into());
    }

    /// The working root's architype.
    pub fn get_root(&mut self) -> Result<&Architype> {
        self.ensure_open()?;
        let root = self.root;
        Ok(&self.anchor(&root)?.architype)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SpatiaError::ContextClosed);
        }
        Ok(())
    }

    /// Record an error against the context. Storage errors poison it.
    pub(crate) fn observe(&mut self, err: SpatiaError) -> SpatiaError {
        if err.is_storage() || err.is_reference() {
            self.status = err.status();
        }
        if err.is_storage() && !self.poisoned {
            warn!(error = %err, "Storage failure, context poisoned");
            self.poisoned = true;
        }
        err
    }

    /// Materialize `id` in the overlay. Returns whether it exists.
    pub(crate) fn materialize(&mut self, id: &RefId) -> Result<bool> {
        self.ensure_open()?;
        match self.overlay.ensure(id) {
            Ok(found) => Ok(found),
            Err(e) => Err(self.observe(e)),
        }
    }

    pub(crate) fn cached(&self, id: &RefId) -> Option<&Anchor> {
        self.overlay.get(id)
    }

    pub(crate) fn cached_mut(&mut self, id: &RefId) -> Option<&mut Anchor> {
        self.overlay.get_mut(id)
    }

    pub(crate) fn anchor(&mut self, id: &RefId) -> Result<&Anchor> {
        if !self.materialize(id)? {
            return Err(SpatiaError::NotFound(id.to_string()));
        }
        self.overlay
            .get(id)
            .ok_or_else(|| SpatiaError::NotFound(id.to_string()))
    }

    fn anchor_mut(&mut self, id: &RefId) -> Result<&mut Anchor> {
        if !self.materialize(id)? {
            return Err(SpatiaError::NotFound(id.to_string()));
        }
        self.overlay
            .get_mut(id)
            .ok_or_else(|| SpatiaError::NotFound(id.to_string()))
    }

    fn node(&mut self, id: &RefId) -> Result<&NodeArchitype> {
        let anchor = self.anchor(id)?;
        let kind = anchor.architype.kind();
        anchor
            .architype
            .as_node()
            .ok_or_else(|| SpatiaError::KindMismatch {
                id: id.to_string(),
                expected: EntityKind::Node.to_string(),
                actual: kind.to_string(),
            })
    }

    /// Effective access level of this context's principal on `id`.
    pub fn access_level(&mut self, id: &RefId) -> Result<AccessLevel> {
        let principal = self.principal;
        Ok(self.anchor(id)?.access_for(&principal))
    }

    /// Check `required` on `id`; a denial is reported, not raised.
    fn permitted(&mut self, op: &str, id: &RefId, required: AccessLevel) -> Result<bool> {
        let actual = self.access_level(id)?;
        if actual >= required {
            return Ok(true);
        }
        warn!(op, target = %id, %required, %actual, "Access denied");
        self.report(
            Record::new("AccessDenied")
                .field("op", op)
                .field("target", id.to_string())
                .field("required", required.to_string())
                .field("actual", actual.to_string()),
        );
        Ok(false)
    }

    fn spawn(&mut self, architype: Architype) -> Result<RefId> {
        self.ensure_open()?;
        let anchor = Anchor::new(architype, self.principal);
        let id = anchor.id;
        debug!(id = %id, type_name = anchor.architype.type_name(), "Anchor spawned");
        self.overlay.insert(anchor);
        Ok(id)
    }

    pub fn spawn_node(&mut self, payload: Payload) -> Result<RefId> {
        self.spawn(Architype::node(payload))
    }

    pub fn spawn_object(&mut self, payload: Payload) -> Result<RefId> {
        self.spawn(Architype::object(payload))
    }

    pub fn spawn_walker(&mut self, payload: Payload) -> Result<RefId> {
        self.spawn(Architype::walker(payload))
    }

    /// Payload of `id` if the principal may read it.
    pub fn payload(&mut self, id: &RefId) -> Result<Option<Payload>> {
        self.ensure_open()?;
        if self.access_level(id)? < AccessLevel::Read {
            return Ok(None);
        }
        Ok(Some(self.anchor(id)?.architype.payload().clone()))
    }

    /// Set a payload field. Requires WRITE.
    pub fn set_field(
        &mut self,
        id: &RefId,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Result<bool> {
        self.ensure_open()?;
        if !self.permitted("set_field", id, AccessLevel::Write)? {
            return Ok(false);
        }
        self.anchor_mut(id)?.architype.payload_mut().set(key, value);
        Ok(true)
    }

    /// Create an edge from `source` to `target`. Requires WRITE on `source`.
    ///
    /// Roots take no inbound edges. Returns `None` when the edge was refused.
    pub fn connect(&mut self, source: RefId, target: RefId, spec: EdgeSpec) -> Result<Option<RefId>> {
        self.ensure_open()?;
        self.node(&source)?;
        let into_root = self.anchor(&target)?.architype.is_root();
        self.node(&target)?;
        if into_root && target != source {
            warn!(source = %source, target = %target, "Edge into a root refused");
            self.report(
                Record::new("ConnectRefused")
                    .field("source", source.to_string())
                    .field("target", target.to_string())
                    .field("reason", "roots take no inbound edges"),
            );
            return Ok(None);
        }
        if !self.permitted("connect", &source, AccessLevel::Write)? {
            return Ok(None);
        }

        let edge = Anchor::new(
            Architype::Edge(EdgeArchitype {
                payload: spec.payload,
                source,
                target,
                undirected: spec.undirected,
            }),
            self.principal,
        );
        let edge_id = edge.id;
        self.overlay.insert(edge);
        self.attach(&source, edge_id)?;
        if target != source {
            self.attach(&target, edge_id)?;
        }
        debug!(edge = %edge_id, source = %source, target = %target, "Connected");
        Ok(Some(edge_id))
    }

    fn attach(&mut self, node: &RefId, edge: RefId) -> Result<()> {
        if let Some(n) = self.anchor_mut(node)?.architype.as_node_mut() {
            n.edges.push(edge);
        }
        Ok(())
    }

    /// Remove every edge leading from `source` to `target`.
    /// Each edge requires WRITE; denied edges are reported and kept.
    pub fn disconnect(&mut self, source: RefId, target: RefId) -> Result<usize> {
        self.ensure_open()?;
        let attached = self.node(&source)?.edges.clone();
        let mut removed = 0;
        for edge_id in attached {
            if !self.materialize(&edge_id)? {
                continue;
            }
            let links = match self.overlay.get(&edge_id).and_then(|a| a.architype.as_edge()) {
                Some(e) => {
                    (e.source == source && e.target == target)
                        || (e.undirected && e.source == target && e.target == source)
                }
                None => false,
            };
            if !links || !self.permitted("disconnect", &edge_id, AccessLevel::Write)? {
                continue;
            }
            self.remove_edge(&edge_id)?;
            removed += 1;
        }
        debug!(source = %source, target = %target, removed, "Disconnected");
        Ok(removed)
    }

    /// Detach an edge from both endpoints and drop it.
    fn remove_edge(&mut self, edge_id: &RefId) -> Result<()> {
        let ends = self
            .overlay
            .get(edge_id)
            .and_then(|a| a.architype.as_edge())
            .map(|e| [e.source, e.target]);
        if let Some(ends) = ends {
            for end in ends {
                if !self.materialize(&end)? {
                    continue;
                }
                if let Some(node) = self.overlay.get_mut(&end).and_then(|a| a.architype.as_node_mut()) {
                    node.edges.retain(|e| e != edge_id);
                }
            }
        }
        self.overlay.remove(edge_id);
        Ok(())
    }

    /// Attached edges of `origin` visible to the principal.
    ///
    /// An edge is visible when the principal can READ the origin, the edge
    /// and the far endpoint. Anything else is silently left out.
    pub fn edges(&mut self, origin: RefId, filter: &EdgeFilter) -> Result<Vec<RefId>> {
        self.ensure_open()?;
        let principal = self.principal;
        let attached = self.node(&origin)?.edges.clone();
        if self.access_level(&origin)? < AccessLevel::Read {
            return Ok(Vec::new());
        }

        let mut visible = Vec::new();
        for edge_id in attached {
            if !self.materialize(&edge_id)? {
                continue;
            }
            let far = match self.overlay.get(&edge_id) {
                Some(anchor) if anchor.access_for(&principal) >= AccessLevel::Read => {
                    match anchor.architype.as_edge() {
                        Some(edge) if filter.admits(edge, &origin) => edge.opposite(&origin),
                        _ => None,
                    }
                }
                _ => None,
            };
            let Some(far) = far else {
                continue;
            };
            if !self.materialize(&far)? {
                continue;
            }
            let readable = self
                .overlay
                .get(&far)
                .map(|a| a.access_for(&principal) >= AccessLevel::Read)
                .unwrap_or(false);
            if readable {
                visible.push(edge_id);
            }
        }
        Ok(visible)
    }

    /// Far endpoints of the visible edges of `origin`, in edge order.
    pub fn neighbors(&mut self, origin: RefId, filter: &EdgeFilter) -> Result<Vec<RefId>> {
        let edges = self.edges(origin, filter)?;
        Ok(edges
            .iter()
            .filter_map(|e| {
                self.overlay
                    .get(e)
                    .and_then(|a| a.architype.as_edge())
                    .and_then(|edge| edge.opposite(&origin))
            })
            .collect())
    }

    /// Delete an anchor and every edge attached to it. Requires WRITE.
    pub fn destroy(&mut self, id: RefId) -> Result<bool> {
        self.ensure_open()?;
        if self.anchor(&id)?.architype.is_root() {
            warn!(id = %id, "Roots cannot be destroyed");
            return Ok(false);
        }
        if !self.permitted("destroy", &id, AccessLevel::Write)? {
            return Ok(false);
        }

        let attached = match self.cached(&id).map(|a| &a.architype) {
            Some(Architype::Node(node)) => node.edges.clone(),
            _ => Vec::new(),
        };
        for edge_id in attached {
            if self.materialize(&edge_id)? {
                self.remove_edge(&edge_id)?;
            }
        }
        if id.kind() == EntityKind::Edge {
            self.remove_edge(&id)?;
        } else {
            self.overlay.remove(&id);
        }
        debug!(id = %id, "Destroyed");
        Ok(true)
    }

    /// Keep `id` on close even if it is unreachable. Requires WRITE.
    pub fn persist(&mut self, id: RefId) -> Result<bool> {
        self.ensure_open()?;
        if !self.permitted("persist", &id, AccessLevel::Write)? {
            return Ok(false);
        }
        match self.overlay.persist(&id) {
            Ok(true) => Ok(true),
            Ok(false) => Err(SpatiaError::NotFound(id.to_string())),
            Err(e) => Err(self.observe(e)),
        }
    }

    /// Grant `principal` a level on `target`. Requires ADMIN.
    pub fn grant(&mut self, target: RefId, principal: RefId, level: AccessLevel) -> Result<bool> {
        self.ensure_open()?;
        if !self.permitted("grant", &target, AccessLevel::Admin)? {
            return Ok(false);
        }
        self.anchor_mut(&target)?.access.grant(principal, level);
        Ok(true)
    }

    /// Remove `principal`'s explicit grant on `target`. Requires ADMIN.
    pub fn revoke(&mut self, target: RefId, principal: RefId) -> Result<bool> {
        self.ensure_open()?;
        if !self.permitted("revoke", &target, AccessLevel::Admin)? {
            return Ok(false);
        }
        Ok(self.anchor_mut(&target)?.access.revoke(&principal).is_some())
    }

    /// Set the level every principal gets on `target`. Requires ADMIN.
    pub fn set_default_access(&mut self, target: RefId, level: AccessLevel) -> Result<bool> {
        self.ensure_open()?;
        if !self.permitted("set_default_access", &target, AccessLevel::Admin)? {
            return Ok(false);
        }
        self.anchor_mut(&target)?.access.all = level;
        Ok(true)
    }

    /// Serialize the report buffer and, when enabled, `returns`.
    pub fn response(&mut self, returns: Vec<Value>) -> Result<Response> {
        let reports = self.reports.clone();
        let show_returns = self.config.show_returns;
        let status = self.status;

        let mut projector = Projector::new(self);
        let reports = projector.list(&reports)?;
        let returns = if show_returns {
            Some(projector.list(&returns)?)
        } else {
            None
        };

        Ok(Response {
            status,
            reports: (!reports.is_empty()).then_some(reports),
            returns,
        })
    }

    /// Flush the overlay and release it. Idempotent.
    ///
    /// A poisoned context discards instead of flushing.
    pub fn close(&mut self) -> Result<FlushStats> {
        if self.closed {
            return Ok(FlushStats::default());
        }
        self.closed = true;

        if self.poisoned {
            warn!(root = %self.root, "Closing poisoned context, discarding overlay");
            self.overlay.discard();
            return Ok(FlushStats::default());
        }

        match self.overlay.flush() {
            Ok(stats) => {
                info!(
                    root = %self.root,
                    written = stats.written,
                    deleted = stats.deleted,
                    discarded = stats.discarded,
                    "Context closed"
                );
                self.overlay.discard();
                Ok(stats)
            }
            Err(e) => {
                let e = self.observe(e);
                self.overlay.discard();
                Err(e)
            }
        }
    }

    /// Discard every pending change and close.
    pub fn abort(&mut self) {
        if !self.closed {
            debug!(root = %self.root, "Context aborted");
            self.overlay.discard();
            self.closed = true;
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.closed {
            debug!(root = %self.root, "Context dropped without close, discarding");
            self.overlay.discard();
        }
    }
}

fn resolve_entry(overlay: &mut Overlay, raw: &str) -> Result<RefId> {
    let id: RefId = raw.parse()?;
    if id.kind() != EntityKind::Node {
        return Err(SpatiaError::InvalidReference(format!(
            "entry must be a node: {}",
            raw
        )));
    }
    match overlay.load(&id)? {
        Some(anchor) if anchor.architype.is_node() => Ok(id),
        Some(_) => Err(SpatiaError::InvalidReference(format!(
            "entry is not a node: {}",
            raw
        ))),
        None => Err(SpatiaError::NotFound(raw.to_string())),
    }
}
