//! Error types for SofaDB core.

use sofadb_codec::CodecError;
use sofadb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SofaDB core operations.
///
/// Errors are `Clone` so a failure inside a queued task reaches every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed input.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// A document was not a JSON object.
    #[error("document must be a JSON object")]
    NotAnObject,

    /// The document or revision does not exist.
    #[error("document {id} not found: {reason}")]
    MissingDoc {
        /// The requested document id.
        id: String,
        /// `missing` or `deleted`.
        reason: MissingReason,
    },

    /// The supplied revision is not a current leaf.
    #[error("document update conflict on {id}")]
    RevConflict {
        /// The conflicting document id.
        id: String,
    },

    /// An attachment stub references a body that is not stored.
    #[error("attachment stub {name} of document {id} has no stored body")]
    MissingStub {
        /// The document carrying the stub.
        id: String,
        /// The attachment name.
        name: String,
    },

    /// Document id is empty or uses a reserved prefix.
    #[error("invalid document id {id:?}: {message}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        message: String,
    },

    /// Revision string could not be parsed.
    #[error("invalid revision {rev:?}")]
    InvalidRev {
        /// The rejected revision string.
        rev: String,
    },

    /// A bulk request had no `docs` array.
    #[error("bulk request is missing a docs array")]
    MissingBulkDocs,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A stored revision tree is inconsistent.
    #[error("invalid revision tree: {message}")]
    InvalidRevTree {
        /// Description of the inconsistency.
        message: String,
    },

    /// The database has been closed or destroyed.
    #[error("database is closed")]
    DatabaseClosed,
}

/// Why a document lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// No such document or revision.
    Missing,
    /// The document exists but its winning revision is deleted.
    Deleted,
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::Deleted => "deleted",
        })
    }
}

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input.
    BadRequest,
    /// Document body was not an object.
    NotAnObject,
    /// Document or revision not found.
    MissingDoc,
    /// Update from a stale revision.
    RevConflict,
    /// Attachment stub without a stored body.
    MissingStub,
    /// Rejected document id.
    InvalidId,
    /// Unparseable revision.
    InvalidRev,
    /// Bulk request without documents.
    MissingBulkDocs,
    /// Backend or persisted-data failure.
    StorageError,
    /// Inconsistent revision tree.
    InvalidRevTree,
    /// Operation on a closed database.
    DatabaseClosed,
}

impl ErrorKind {
    /// Stable string name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotAnObject => "not_an_object",
            Self::MissingDoc => "missing_doc",
            Self::RevConflict => "rev_conflict",
            Self::MissingStub => "missing_stub",
            Self::InvalidId => "invalid_id",
            Self::InvalidRev => "invalid_rev",
            Self::MissingBulkDocs => "missing_bulk_docs",
            Self::StorageError => "storage_error",
            Self::InvalidRevTree => "invalid_rev_tree",
            Self::DatabaseClosed => "database_closed",
        }
    }

    /// HTTP-style status code for the kind.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::BadRequest
            | Self::NotAnObject
            | Self::InvalidId
            | Self::InvalidRev
            | Self::MissingBulkDocs => 400,
            Self::MissingDoc => 404,
            Self::RevConflict => 409,
            Self::MissingStub => 412,
            Self::StorageError | Self::InvalidRevTree => 500,
            Self::DatabaseClosed => 503,
        }
    }
}

impl CoreError {
    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a missing document error.
    pub fn missing(id: impl Into<String>) -> Self {
        Self::MissingDoc {
            id: id.into(),
            reason: MissingReason::Missing,
        }
    }

    /// Creates a deleted document error.
    pub fn deleted(id: impl Into<String>) -> Self {
        Self::MissingDoc {
            id: id.into(),
            reason: MissingReason::Deleted,
        }
    }

    /// Creates a revision conflict error.
    pub fn rev_conflict(id: impl Into<String>) -> Self {
        Self::RevConflict { id: id.into() }
    }

    /// Creates a missing stub error.
    pub fn missing_stub(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingStub {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid revision error.
    pub fn invalid_rev(rev: impl Into<String>) -> Self {
        Self::InvalidRev { rev: rev.into() }
    }

    /// Creates an invalid revision tree error.
    pub fn invalid_rev_tree(message: impl Into<String>) -> Self {
        Self::InvalidRevTree {
            message: message.into(),
        }
    }

    /// Creates the error for an on-disk format this build cannot read.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::Storage(StorageError::Version(message.into()))
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::NotAnObject => ErrorKind::NotAnObject,
            Self::MissingDoc { .. } => ErrorKind::MissingDoc,
            Self::RevConflict { .. } => ErrorKind::RevConflict,
            Self::MissingStub { .. } => ErrorKind::MissingStub,
            Self::InvalidId { .. } => ErrorKind::InvalidId,
            Self::InvalidRev { .. } => ErrorKind::InvalidRev,
            Self::MissingBulkDocs => ErrorKind::MissingBulkDocs,
            Self::Storage(_) | Self::Codec(_) => ErrorKind::StorageError,
            Self::InvalidRevTree { .. } => ErrorKind::InvalidRevTree,
            Self::DatabaseClosed => ErrorKind::DatabaseClosed,
        }
    }

    /// The document id this error refers to, if any.
    #[must_use]
    pub fn doc_id(&self) -> Option<&str> {
        match self {
            Self::MissingDoc { id, .. }
            | Self::RevConflict { id }
            | Self::MissingStub { id, .. }
            | Self::InvalidId { id, .. } => Some(id),
            _ => None,
        }
    }

    /// True if the error belongs to one document of a batch rather than the
    /// whole transaction.
    #[must_use]
    pub fn is_document_error(&self) -> bool {
        !matches!(
            self,
            Self::Storage(_) | Self::Codec(_) | Self::InvalidRevTree { .. } | Self::DatabaseClosed
        )
    }

    /// True if the underlying connection is unusable and must be reopened.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_connection_failure())
    }
}
