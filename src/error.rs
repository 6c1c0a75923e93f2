//! Error types shared by the store, the sync orchestrator and the write flow.

use std::fmt;

/// Failures raised by the local store and the components built on it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("local store unavailable")]
    Unavailable,

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("post-ingest hook failed: {0}")]
    Hook(anyhow::Error),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Hard failures of a write-flow operation.
///
/// A failed publish is not in this list: it is reported as a successful call
/// whose pending write ended in `failed` status.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("local store unavailable")]
    DbUnavailable,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("signing failed: {0}")]
    SignFailed(String),

    #[error("{0}")]
    InvalidPendingWrite(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("local commit failed: {0}")]
    CommitFailed(#[source] CacheError),
}

impl WriteError {
    /// Stable machine-readable code for the failure.
    pub fn reason(&self) -> &'static str {
        match self {
            WriteError::DbUnavailable => "db_unavailable",
            WriteError::PermissionDenied(_) => "permission_denied",
            WriteError::SignFailed(_) => "sign_failed",
            WriteError::InvalidPendingWrite(_) => "invalid_pending_write",
            WriteError::InvalidInput(_) => "invalid_input",
            WriteError::CommitFailed(_) => "commit_failed",
        }
    }

    /// Whether repeating the same call may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::SignFailed(_) | WriteError::CommitFailed(_))
    }
}

impl From<CacheError> for WriteError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable => WriteError::DbUnavailable,
            other => WriteError::CommitFailed(other),
        }
    }
}

/// Failure of a single (source, stream) pair during a sync pass.
#[derive(Debug)]
pub struct PairFailure {
    pub source: String,
    pub stream: String,
    pub error: CacheError,
}

impl fmt::Display for PairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.source, self.stream, self.error)
    }
}

/// A sync pass in which at least one (source, stream) pair failed.
///
/// The pairs that did commit are reflected in `stats`.
#[derive(Debug, thiserror::Error)]
#[error("sync failed for {} pair(s): {}", .failures.len(), first_failure(.failures))]
pub struct SyncError {
    pub stats: crate::sync::SyncStats,
    pub failures: Vec<PairFailure>,
}

fn first_failure(failures: &[PairFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_reasons() {
        assert_eq!(WriteError::DbUnavailable.reason(), "db_unavailable");
        assert_eq!(
            WriteError::PermissionDenied("nope".into()).reason(),
            "permission_denied"
        );
        assert_eq!(WriteError::SignFailed("x".into()).reason(), "sign_failed");
        assert_eq!(
            WriteError::InvalidPendingWrite("x".into()).reason(),
            "invalid_pending_write"
        );
    }

    #[test]
    fn test_unavailable_store_maps_to_db_unavailable() {
        let err: WriteError = CacheError::Unavailable.into();
        assert_eq!(err.reason(), "db_unavailable");
        assert!(!err.is_retryable());

        let err: WriteError = CacheError::InvalidRow("bad".into()).into();
        assert_eq!(err.reason(), "commit_failed");
        assert!(err.is_retryable());
    }
}
