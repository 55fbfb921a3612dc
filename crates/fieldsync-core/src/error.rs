//! Error types for Fieldsync

use thiserror::Error;

/// Main error type for Fieldsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The environment provides no usable persistent storage.
    /// Fatal at initialization: queueing features is disabled.
    #[error("Persistent storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error: the transaction did not apply
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A replay submission was rejected or errored by the remote service
    #[error("Remote submit failed: {0}")]
    RemoteSubmitFailed(String),

    /// Attachment reassignment failed after a successful add replay
    #[error("Id remapping failed: {0}")]
    IdRemappingFailed(String),

    /// A replay is already in flight; reentrant go_online is rejected
    #[error("Replay already in progress")]
    ReplayInProgress,

    /// Attachment not found in the local queue
    #[error("Attachment not found: {0}")]
    AttachmentNotFound(i64),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::RemoteSubmitFailed("edit rejected".to_string());
        assert_eq!(format!("{}", err), "Remote submit failed: edit rejected");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }
}
