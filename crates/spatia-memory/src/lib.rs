pub mod memory;
pub mod overlay;
pub mod registry;
pub mod store;

use std::sync::Arc;

use tracing::info;

use spatia_core::config::{AppConfig, StorageBackend};
use spatia_core::error::Result;
use spatia_core::traits::Storage;

pub use memory::MemoryStore;
pub use overlay::{FlushStats, Overlay};
pub use registry::RootRegistry;
pub use store::SqliteStore;

/// Open the storage backend selected by the configuration.
pub fn open_store(config: &AppConfig) -> Result<Arc<dyn Storage>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = config.storage_path();
            info!(path = %path.display(), "Opening SQLite store");
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
