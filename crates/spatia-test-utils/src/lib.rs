//! Shared test utilities for spatia crates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use spatia_core::anchor::{Anchor, Payload};
use spatia_core::config::AppConfig;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::RefId;
use spatia_core::traits::{CommitStats, Storage, UpsertOutcome, WriteOp};
use spatia_memory::MemoryStore;

/// Store wrapper that fails on demand.
///
/// Writes and reads can be switched off independently; a failed `apply`
/// never reaches the wrapped store.
pub struct FailingStore {
    inner: Arc<dyn Storage>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    failures: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        }
    }

    /// Wrap a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Number of operations rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(SpatiaError::Database(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

impl Storage for FailingStore {
    fn find_by_id(&self, id: &RefId) -> Result<Option<Anchor>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.find_by_id(id)
    }

    fn upsert(&self, anchor: &Anchor) -> Result<UpsertOutcome> {
        self.check(&self.fail_writes, "write")?;
        self.inner.upsert(anchor)
    }

    fn exists(&self, id: &RefId) -> Result<bool> {
        self.check(&self.fail_reads, "read")?;
        self.inner.exists(id)
    }

    fn delete(&self, id: &RefId) -> Result<bool> {
        self.check(&self.fail_writes, "write")?;
        self.inner.delete(id)
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<CommitStats> {
        self.check(&self.fail_writes, "write")?;
        self.inner.apply(ops)
    }

    fn root_of(&self, principal: &str) -> Result<Option<RefId>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.root_of(principal)
    }

    fn bind_root(&self, principal: &str, root: &RefId) -> Result<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.bind_root(principal, root)
    }
}

/// A shared in-memory store.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Payload of type `type_name` with a `name` field.
pub fn named(type_name: &str, name: &str) -> Payload {
    Payload::new(type_name).with("name", name)
}

/// Config with the in-memory backend and the given runtime overrides.
pub fn test_config(runtime_toml: &str) -> AppConfig {
    let text = format!("[storage]\nbackend = \"memory\"\n\n[runtime]\n{}", runtime_toml);
    AppConfig::parse(&text).expect("valid test config")
}

/// Write `content` to a temp TOML file and return its handle.
pub fn temp_config_file(content: &str) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

/// Parse an inline TOML table, for asserting on rendered config.
pub fn toml_table(content: &str) -> toml::Table {
    content.parse::<toml::Table>().expect("valid toml")
}

/// Extract a string field from a JSON projection.
pub fn json_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}
