pub mod access;
pub mod anchor;
pub mod config;
pub mod error;
pub mod id;
pub mod traits;
pub mod value;

pub use access::{Access, AccessLevel};
pub use anchor::{
    Anchor, Architype, EdgeArchitype, NodeArchitype, ObjectArchitype, Payload, WalkerArchitype,
    WalkerStatus,
};
pub use config::AppConfig;
pub use error::{Result, SpatiaError};
pub use id::{EntityKind, RefId, PUBLIC_ROOT, SYSTEM_ROOT};
pub use traits::{CommitStats, Storage, UpsertOutcome, WriteOp};
pub use value::{Record, Value};
