use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use spatia_core::anchor::Architype;
use spatia_core::config::RuntimeConfig;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::traits::Storage;
use spatia_memory::{FlushStats, RootRegistry};

use crate::context::{ContextRequest, ExecutionContext};

pub type SharedContext = Arc<Mutex<ExecutionContext>>;

/// A session's context holder. Opens and closes on one session take its lock.
type Slot = Arc<Mutex<Option<SharedContext>>>;

/// Tracks the single active context of each session.
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    registry: Arc<RootRegistry>,
    config: RuntimeConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves the data usable.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    pub fn new(storage: Arc<dyn Storage>, config: RuntimeConfig) -> Self {
        let registry = Arc::new(RootRegistry::new(storage.clone()));
        Self {
            storage,
            registry,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<RootRegistry> {
        &self.registry
    }

    fn slot(&self, session: &str) -> Slot {
        lock(&self.slots)
            .entry(session.to_string())
            .or_default()
            .clone()
    }

    /// Open a context for `session`, closing the one it replaces first.
    ///
    /// Concurrent opens of the same session are serialized; other sessions
    /// are not blocked.
    pub fn open(&self, session: &str, request: ContextRequest) -> Result<SharedContext> {
        let slot = self.slot(session);
        let mut current = lock(&slot);
        if let Some(previous) = current.take() {
            let stats = lock(&previous).close()?;
            debug!(session, written = stats.written, "Previous context closed");
        }

        let ctx = ExecutionContext::create(
            self.storage.clone(),
            self.registry.clone(),
            request,
            self.config.clone(),
        )?;
        let shared = Arc::new(Mutex::new(ctx));
        *current = Some(shared.clone());
        info!(session, "Context opened");
        Ok(shared)
    }

    fn current(&self, session: &str) -> Result<SharedContext> {
        let slot = lock(&self.slots)
            .get(session)
            .cloned()
            .ok_or(SpatiaError::NoActiveContext)?;
        let ctx = lock(&slot).clone();
        ctx.ok_or(SpatiaError::NoActiveContext)
    }

    /// Run `f` with exclusive access to the session's context.
    pub fn with_context<R>(
        &self,
        session: &str,
        f: impl FnOnce(&mut ExecutionContext) -> Result<R>,
    ) -> Result<R> {
        let ctx = self.current(session)?;
        let mut guard = lock(&ctx);
        f(&mut *guard)
    }

    /// Architype of the session's working root.
    pub fn get_root(&self, session: &str) -> Result<Architype> {
        self.with_context(session, |ctx| ctx.get_root().cloned())
    }

    /// Close the session's context. Idempotent.
    pub fn close(&self, session: &str) -> Result<FlushStats> {
        let Some(slot) = lock(&self.slots).get(session).cloned() else {
            return Ok(FlushStats::default());
        };
        let ctx = lock(&slot).take();
        match ctx {
            Some(ctx) => {
                let stats = lock(&ctx).close()?;
                info!(session, written = stats.written, "Context closed");
                Ok(stats)
            }
            None => Ok(FlushStats::default()),
        }
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = lock(&self.slots)
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| lock(slot).is_some())
            .map(|(name, _)| name)
            .collect()
    }
}
