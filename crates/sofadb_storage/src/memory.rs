//! In-memory backend for tests and ephemeral databases.

use crate::backend::{Backend, KvEngine};
use crate::error::{StorageError, StorageResult};
use crate::store::SharedStore;
use crate::transaction::{KvTransaction, TxnMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A backend keeping every database in process memory.
///
/// Stores outlive individual connections: closing an engine and opening the
/// same name again sees the same data until [`Backend::destroy`] is called.
///
/// # Example
///
/// ```rust
/// use sofadb_storage::{Backend, KvEngine, MemoryBackend, TxnMode};
///
/// let backend = MemoryBackend::new();
/// let engine = backend.open("scratch").unwrap();
///
/// let mut upgrade = engine.begin_upgrade(1).unwrap();
/// upgrade.create_collection("docs").unwrap();
/// engine.commit(upgrade).unwrap();
///
/// let mut txn = engine.begin(TxnMode::ReadWrite, &["docs"]).unwrap();
/// txn.put("docs", b"a".to_vec(), b"1".to_vec()).unwrap();
/// engine.commit(txn).unwrap();
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, Arc<SharedStore>>>,
    batch_fetch: bool,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            batch_fetch: true,
        }
    }

    /// Creates a backend whose engines report no native batch fetch.
    ///
    /// Useful for exercising single-row cursor fallbacks.
    #[must_use]
    pub fn without_batch_fetch() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            batch_fetch: false,
        }
    }

    /// Returns true if a store exists for `db_name`.
    #[must_use]
    pub fn contains(&self, db_name: &str) -> bool {
        self.stores.lock().contains_key(db_name)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn valid(&self) -> bool {
        true
    }

    fn open(&self, db_name: &str) -> StorageResult<Arc<dyn KvEngine>> {
        let store = Arc::clone(
            self.stores
                .lock()
                .entry(db_name.to_string())
                .or_insert_with(|| Arc::new(SharedStore::new())),
        );
        Ok(Arc::new(MemoryEngine {
            name: db_name.to_string(),
            store,
            batch_fetch: self.batch_fetch,
            closed: AtomicBool::new(false),
        }))
    }

    fn destroy(&self, db_name: &str) -> StorageResult<()> {
        self.stores.lock().remove(db_name);
        Ok(())
    }
}

/// A connection to an in-memory store.
#[derive(Debug)]
pub struct MemoryEngine {
    name: String,
    store: Arc<SharedStore>,
    batch_fetch: bool,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// Opens a standalone engine not attached to any backend.
    #[must_use]
    pub fn standalone(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: Arc::new(SharedStore::new()),
            batch_fetch: true,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KvEngine for MemoryEngine {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema_version(&self) -> StorageResult<u32> {
        self.ensure_open()?;
        Ok(self.store.version())
    }

    fn collection_names(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.store.collection_names())
    }

    fn begin(&self, mode: TxnMode, collections: &[&str]) -> StorageResult<KvTransaction> {
        self.ensure_open()?;
        self.store.begin(mode, collections)
    }

    fn begin_upgrade(&self, target_version: u32) -> StorageResult<KvTransaction> {
        self.ensure_open()?;
        self.store.begin_upgrade(target_version)
    }

    fn commit(&self, txn: KvTransaction) -> StorageResult<()> {
        self.ensure_open()?;
        self.store.commit(txn, |_| Ok(()))
    }

    fn supports_batch_fetch(&self) -> bool {
        self.batch_fetch
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
