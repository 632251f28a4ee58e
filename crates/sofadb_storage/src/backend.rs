//! Key-value engine and backend trait definitions.

use crate::error::StorageResult;
use crate::transaction::{KvTransaction, TxnMode};
use std::fmt;
use std::sync::Arc;

/// An open connection to an ordered, transactional key-value store.
///
/// The engine knows nothing about documents or revisions. It stores named
/// collections of byte keys to byte values and a schema version number.
///
/// # Invariants
///
/// - A transaction sees the snapshot taken by `begin`
/// - `commit` applies all staged writes atomically or none of them
/// - A write transaction whose collections were changed by another commit
///   since it began fails with [`crate::StorageError::Conflict`]
/// - The schema version only changes through `begin_upgrade`
/// - After `close`, every operation fails with [`crate::StorageError::Closed`]
///
/// # Implementors
///
/// - [`super::MemoryEngine`] - process-local stores
/// - [`super::FileEngine`] - one file per database
pub trait KvEngine: Send + Sync + fmt::Debug {
    /// Short name of the backend that opened this engine.
    fn kind(&self) -> &'static str;

    /// Name of the database this connection serves.
    fn name(&self) -> &str;

    /// Current schema version; 0 for a store that has never been initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn schema_version(&self) -> StorageResult<u32>;

    /// Names of the existing collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn collection_names(&self) -> StorageResult<Vec<String>>;

    /// Begins a transaction over the named collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or a collection is unknown.
    fn begin(&self, mode: TxnMode, collections: &[&str]) -> StorageResult<KvTransaction>;

    /// Begins a schema upgrade to `target_version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not newer than the current version.
    fn begin_upgrade(&self, target_version: u32) -> StorageResult<KvTransaction>;

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the commit conflicts with
    /// another writer, or the store cannot be persisted.
    fn commit(&self, txn: KvTransaction) -> StorageResult<()>;

    /// Whether `get_all` is served natively or callers should step a cursor.
    fn supports_batch_fetch(&self) -> bool {
        true
    }

    /// Closes the connection. Data already committed is retained.
    fn close(&self);

    /// Returns true once the connection is closed.
    fn is_closed(&self) -> bool;
}

/// A named factory for key-value engines.
///
/// Backends are registered with the database registry and selected by name
/// or by preference order among those reporting [`Backend::valid`].
pub trait Backend: Send + Sync {
    /// Registered name, e.g. `"memory"` or `"file"`.
    fn name(&self) -> &'static str;

    /// Whether this backend can be used in the current environment.
    fn valid(&self) -> bool;

    /// Opens (creating if needed) the store for `db_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or is locked.
    fn open(&self, db_name: &str) -> StorageResult<Arc<dyn KvEngine>>;

    /// Permanently removes the store for `db_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be removed.
    fn destroy(&self, db_name: &str) -> StorageResult<()>;
}
