#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use spatia_core::anchor::Payload;
use spatia_core::config::RuntimeConfig;
use spatia_core::id::RefId;
use spatia_core::traits::Storage;
use spatia_memory::RootRegistry;
use spatia_runtime::{ContextRequest, EdgeSpec, ExecutionContext};
use spatia_test_utils::named;

pub fn open(storage: Arc<dyn Storage>, request: ContextRequest) -> ExecutionContext {
    open_with(storage, request, RuntimeConfig::default())
}

pub fn open_with(
    storage: Arc<dyn Storage>,
    request: ContextRequest,
    config: RuntimeConfig,
) -> ExecutionContext {
    let registry = Arc::new(RootRegistry::new(storage.clone()));
    ExecutionContext::create(storage, registry, request, config).expect("context")
}

/// Connect one fresh node per name to `hub`, in order.
pub fn star(ctx: &mut ExecutionContext, hub: RefId, names: &[&str]) -> Vec<RefId> {
    names
        .iter()
        .map(|name| {
            let id = ctx
                .spawn_node(named("Spot", name))
                .expect("spawn");
            ctx.connect(hub, id, EdgeSpec::new("Path"))
                .expect("connect")
                .expect("connect permitted");
            id
        })
        .collect()
}

/// Shared event log abilities can append to.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Name field of a node payload, or "root".
pub fn name_of(payload: Option<Payload>) -> String {
    payload
        .and_then(|p| p.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "root".to_string())
}
