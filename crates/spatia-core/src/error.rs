use thiserror::Error;

use crate::access::AccessLevel;

#[derive(Debug, Error)]
pub enum SpatiaError {
    // Reference errors
    #[error("Invalid reference id: {0}")]
    InvalidReference(String),

    #[error("Anchor not found: {0}")]
    NotFound(String),

    #[error("Anchor {id} is a {actual}, expected {expected}")]
    KindMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    // Access errors
    #[error("Access denied on {target}: requires {required}, principal {principal} has {actual}")]
    AccessDenied {
        principal: String,
        target: String,
        required: AccessLevel,
        actual: AccessLevel,
    },

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt anchor {id}: {message}")]
    CorruptAnchor { id: String, message: String },

    // Context errors
    #[error("Execution context is not yet available")]
    NoActiveContext,

    #[error("Execution context already closed")]
    ContextClosed,

    // Traversal faults
    #[error("Ability fault at {node}: {message}")]
    AbilityFault { node: String, message: String },

    #[error("Walker exceeded time budget ({0}ms)")]
    WalkerTimeout(u64),

    #[error("Walker exceeded step budget ({0})")]
    StepBudgetExceeded(usize),

    #[error("Walker {0} has already run")]
    WalkerFinished(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpatiaError {
    /// Storage-layer failures are fatal for the current operation.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::CorruptAnchor { .. } | Self::Io(_)
        )
    }

    /// Reference errors are reported synchronously to the caller.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::InvalidReference(_) | Self::NotFound(_) | Self::KindMismatch { .. }
        )
    }

    /// Status code used on the response envelope.
    ///
    /// Traversal faults never reach the envelope on their own; the engine
    /// turns them into `WalkerFault` reports and they map to 500 here.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidReference(_) | Self::KindMismatch { .. } => 400,
            Self::NotFound(_) => 404,
            Self::AccessDenied { .. } => 403,
            Self::NoActiveContext | Self::ContextClosed => 409,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpatiaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_classification() {
        assert!(SpatiaError::Database("locked".into()).is_storage());
        assert!(!SpatiaError::InvalidReference("x".into()).is_storage());
        assert!(SpatiaError::NotFound("n::00".into()).is_reference());
    }

    #[test]
    fn status_codes() {
        assert_eq!(SpatiaError::InvalidReference("bad".into()).status(), 400);
        assert_eq!(SpatiaError::NotFound("n::1".into()).status(), 404);
        assert_eq!(SpatiaError::Database("io".into()).status(), 500);
        assert_eq!(SpatiaError::NoActiveContext.status(), 409);
    }

    #[test]
    fn traversal_faults_share_a_status() {
        let faults = [
            SpatiaError::AbilityFault {
                node: "n::1".into(),
                message: "boom".into(),
            },
            SpatiaError::WalkerTimeout(1),
            SpatiaError::StepBudgetExceeded(2),
        ];
        for fault in &faults {
            assert_eq!(fault.status(), 500, "{}", fault);
            assert!(!fault.is_storage());
        }
    }
}
