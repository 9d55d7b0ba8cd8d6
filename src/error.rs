//! Error types for persistence and HA coordination

use std::time::Duration;
use thiserror::Error;

/// Result type for persistence operations
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while persisting, loading or rebinding state
#[derive(Debug, Error)]
pub enum PersistError {
    /// Read or write against the object store failed
    #[error("Storage I/O error at '{path}': {reason}")]
    StorageIo { path: String, reason: String },

    /// A memento or sync record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted blob had an unexpected envelope
    #[error("Codec error: {reason}")]
    Codec { reason: String },

    /// Operation attempted after `stop()`
    #[error("{component} is not running")]
    NotRunning { component: &'static str },

    /// A referenced ID is absent from the loaded mementos
    #[error("Unresolved {kind} reference '{id}' (referenced by '{referenced_by}')")]
    UnresolvedReference {
        kind: &'static str,
        id: String,
        referenced_by: String,
    },

    /// A lookup asked for an ID that was never registered
    #[error("No {kind} with id '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// A lookup found the ID but with a different type tag
    #[error("Type mismatch for '{id}': expected '{expected}', found '{actual}'")]
    TypeMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// Parent and child references disagree after wiring
    #[error("Inconsistent hierarchy: '{child}' does not agree with parent '{parent}'")]
    InconsistentHierarchy { parent: String, child: String },

    /// Master-change instruction was not recognised
    #[error("Invalid master change: {0}")]
    InvalidMasterChange(String),

    /// Pending writes did not drain in time
    #[error("Timeout after {0:?} waiting for writes to complete")]
    WriteTimeout(Duration),

    /// The background writer has gone away
    #[error("Write queue closed")]
    WriteQueueClosed,
}

impl PersistError {
    pub(crate) fn storage(path: impl Into<String>, reason: impl ToString) -> Self {
        PersistError::StorageIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error indicates state that cannot be recovered from
    /// without operator intervention.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PersistError::WriteTimeout(_)
                | PersistError::NotRunning { .. }
                | PersistError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PersistError::storage("entities/e1", "disk full").is_fatal());
        assert!(PersistError::InvalidMasterChange("bogus".to_string()).is_fatal());
        assert!(!PersistError::WriteTimeout(Duration::from_secs(1)).is_fatal());
        assert!(!PersistError::NotRunning { component: "sync record persister" }.is_fatal());
    }

    #[test]
    fn test_storage_error_names_path() {
        let err = PersistError::storage("ha/master", "permission denied");
        assert_eq!(
            err.to_string(),
            "Storage I/O error at 'ha/master': permission denied"
        );
    }
}
