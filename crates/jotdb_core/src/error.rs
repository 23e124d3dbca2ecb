//! Error types for JotDB core.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in JotDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The named collection does not exist.
    #[error("no such collection: {collection}")]
    NoSuchCollection {
        /// Name of the missing collection.
        collection: String,
    },

    /// A collection with this name already exists.
    #[error("collection already exists: {collection}")]
    CollectionExists {
        /// Name of the existing collection.
        collection: String,
    },

    /// The requested document does not exist.
    #[error("document not found: {id} in collection {collection}")]
    NotFound {
        /// Collection that was searched.
        collection: String,
        /// Document ID that was not found.
        id: String,
    },

    /// A persisted file failed to parse or failed an integrity check.
    #[error("corrupt file {path}: {message}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// Description of the corruption.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An advisory file lock could not be obtained.
    #[error("lock failure on collection {collection}: {message}")]
    LockFailure {
        /// Collection whose lock file failed.
        collection: String,
        /// Underlying failure description.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transaction commit failed before any state was mutated.
    ///
    /// The transaction has been rolled back; no WAL, storage, or index
    /// state changed. The caller may retry with a fresh transaction.
    #[error("commit failed: {reason}")]
    CommitFailed {
        /// Why the commit could not proceed.
        reason: String,
    },

    /// Commit is durable in the WAL but applying it to storage failed.
    ///
    /// The transaction IS committed from a durability standpoint: replay
    /// on the next open will complete it. The caller must NOT retry the
    /// transaction.
    #[error("commit durable but apply failed (replay required): {message}")]
    CommitPendingReplay {
        /// Sequence number of the last durable WAL entry.
        sequence: u64,
        /// Description of the apply failure.
        message: String,
    },

    /// WAL replay failed during startup.
    #[error("WAL replay failed: {message}")]
    ReplayFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid or unrecognized configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration issue.
        message: String,
    },

    /// An invalid argument was passed to an API.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// Too many concurrent transactions.
    #[error("transaction limit reached: {max} concurrent transactions")]
    TransactionLimit {
        /// The configured maximum.
        max: usize,
    },

    /// The database has been closed.
    #[error("database is closed")]
    Closed,
}

impl CoreError {
    /// Creates a no-such-collection error.
    pub fn no_such_collection(collection: impl Into<String>) -> Self {
        Self::NoSuchCollection {
            collection: collection.into(),
        }
    }

    /// Creates a collection-exists error.
    pub fn collection_exists(collection: impl Into<String>) -> Self {
        Self::CollectionExists {
            collection: collection.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a corrupt-file error.
    pub fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Creates a lock-failure error.
    pub fn lock_failure(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LockFailure {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a commit-failed error.
    pub fn commit_failed(reason: impl Into<String>) -> Self {
        Self::CommitFailed {
            reason: reason.into(),
        }
    }

    /// Creates a commit-pending-replay error.
    pub fn commit_pending_replay(sequence: u64, message: impl Into<String>) -> Self {
        Self::CommitPendingReplay {
            sequence,
            message: message.into(),
        }
    }

    /// Creates a replay-failed error.
    pub fn replay_failed(message: impl Into<String>) -> Self {
        Self::ReplayFailed {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_collection() {
        let err = CoreError::no_such_collection("users");
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn display_not_found() {
        let err = CoreError::not_found("users", "u1");
        let text = err.to_string();
        assert!(text.contains("u1"));
        assert!(text.contains("users"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn commit_pending_replay_carries_sequence() {
        let err = CoreError::commit_pending_replay(42, "disk full");
        match err {
            CoreError::CommitPendingReplay { sequence, .. } => assert_eq!(sequence, 42),
            other => panic!("unexpected error: {other}"),
        }
    }
}
