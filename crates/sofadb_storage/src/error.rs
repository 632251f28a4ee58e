//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors are `Clone` so that a single failure can be reported to every
/// caller waiting on the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {message}")]
    Io {
        /// The kind of the underlying I/O error.
        kind: io::ErrorKind,
        /// Description of the error.
        message: String,
    },

    /// The named collection does not exist.
    #[error("collection not found: {0}")]
    UnknownCollection(String),

    /// The named collection was not part of the transaction's scope.
    #[error("collection {0} is outside the transaction scope")]
    OutOfScope(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// An insert found the key already present.
    #[error("key already exists in collection {collection}")]
    Constraint {
        /// The collection that rejected the insert.
        collection: String,
    },

    /// Another writer committed to a collection this transaction wrote.
    #[error("transaction conflict on collection {0}")]
    Conflict(String),

    /// The stored image could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The connection has been closed.
    #[error("storage is closed")]
    Closed,

    /// The connection failed underneath an operation.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Another process holds the database lock.
    #[error("database locked: {0}")]
    Locked(String),

    /// The requested schema version change is not allowed.
    #[error("invalid schema version: {0}")]
    Version(String),
}

impl StorageError {
    /// Returns true when the error means the whole connection is unusable.
    ///
    /// Callers should drop any cached handle and reopen.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Closed | Self::ConnectionLost(_))
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures() {
        assert!(StorageError::Closed.is_connection_failure());
        assert!(StorageError::ConnectionLost("reset".into()).is_connection_failure());
        assert!(!StorageError::ReadOnly.is_connection_failure());
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: StorageError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(
            err,
            StorageError::Io {
                kind: io::ErrorKind::NotFound,
                ..
            }
        ));
    }
}
