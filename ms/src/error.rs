//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock timeout on {path} after {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid store name: {0}")]
    InvalidName(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Conflict errors are recoverable by the caller (CAS retry, rename)
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Not-found errors are recoverable by the caller
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Recoverable errors become descriptive strings fed back to the model;
    /// everything else propagates
    pub fn is_recoverable(&self) -> bool {
        self.is_conflict() || self.is_not_found()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_recoverable() {
        let err = StoreError::Conflict("version mismatch".to_string());
        assert!(err.is_conflict());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invariant_violation_is_not_recoverable() {
        let err = StoreError::InvariantViolation("overlapping ranges".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = StoreError::NotFound("/knowledge/auth".to_string());
        assert!(err.to_string().contains("/knowledge/auth"));
    }
}
