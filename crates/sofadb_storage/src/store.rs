//! Shared in-process store image used by every backend.
//!
//! A store image is a set of named collections plus a schema version. Each
//! collection is held behind an `Arc` so transactions can snapshot it cheaply
//! and copy it on first write.

use crate::error::{StorageError, StorageResult};
use crate::transaction::{KvTransaction, TxnMode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One named, ordered collection of byte keys to byte values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Collection {
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Last key handed out by `add_auto`; keys are never reused.
    pub(crate) last_auto: u64,
    /// Bumped on every commit that writes this collection.
    #[serde(skip)]
    pub(crate) generation: u64,
}

/// Snapshot of a whole store.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreImage {
    pub(crate) version: u32,
    pub(crate) collections: BTreeMap<String, Arc<Collection>>,
}

/// On-disk form of a store image.
#[derive(Serialize, Deserialize)]
pub(crate) struct PersistedImage {
    pub(crate) version: u32,
    pub(crate) collections: BTreeMap<String, Collection>,
}

impl StoreImage {
    pub(crate) fn to_persisted(&self) -> PersistedImage {
        PersistedImage {
            version: self.version,
            collections: self
                .collections
                .iter()
                .map(|(name, coll)| (name.clone(), Collection::clone(coll)))
                .collect(),
        }
    }

    pub(crate) fn from_persisted(image: PersistedImage) -> Self {
        Self {
            version: image.version,
            collections: image
                .collections
                .into_iter()
                .map(|(name, coll)| (name, Arc::new(coll)))
                .collect(),
        }
    }
}

/// A store image guarded for concurrent transactions.
#[derive(Debug, Default)]
pub(crate) struct SharedStore {
    image: RwLock<StoreImage>,
}

impl SharedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_image(image: StoreImage) -> Self {
        Self {
            image: RwLock::new(image),
        }
    }

    pub(crate) fn version(&self) -> u32 {
        self.image.read().version
    }

    pub(crate) fn collection_names(&self) -> Vec<String> {
        self.image.read().collections.keys().cloned().collect()
    }

    pub(crate) fn begin(&self, mode: TxnMode, names: &[&str]) -> StorageResult<KvTransaction> {
        let image = self.image.read();
        let mut collections = BTreeMap::new();
        for name in names {
            let coll = image
                .collections
                .get(*name)
                .ok_or_else(|| StorageError::UnknownCollection((*name).to_string()))?;
            collections.insert((*name).to_string(), Arc::clone(coll));
        }
        Ok(KvTransaction::new(mode, collections, None))
    }

    pub(crate) fn begin_upgrade(&self, target_version: u32) -> StorageResult<KvTransaction> {
        let image = self.image.read();
        if target_version <= image.version {
            return Err(StorageError::Version(format!(
                "cannot upgrade from v{} to v{}",
                image.version, target_version
            )));
        }
        Ok(KvTransaction::new(
            TxnMode::VersionChange,
            image.collections.clone(),
            Some(target_version),
        ))
    }

    /// Applies a finished transaction.
    ///
    /// `persist` sees the new image before it becomes visible; if it fails the
    /// store is left unchanged.
    pub(crate) fn commit<F>(&self, txn: KvTransaction, persist: F) -> StorageResult<()>
    where
        F: FnOnce(&StoreImage) -> StorageResult<()>,
    {
        if !txn.has_changes() {
            return Ok(());
        }

        let mut image = self.image.write();
        let mut next = image.clone();
        let parts = txn.into_parts();

        if parts.mode == TxnMode::VersionChange {
            if let Some(version) = parts.target_version {
                if version <= image.version {
                    return Err(StorageError::Version(format!(
                        "schema already at v{}",
                        image.version
                    )));
                }
                next.version = version;
            }
            for name in &parts.deleted {
                next.collections.remove(name);
            }
        }

        for name in &parts.dirty {
            let Some(mut coll) = parts.collections.get(name).cloned() else {
                continue;
            };
            if let Some(current) = image.collections.get(name) {
                let base = parts.base_generations.get(name).copied();
                if base != Some(current.generation) {
                    return Err(StorageError::Conflict(name.clone()));
                }
            }
            Arc::make_mut(&mut coll).generation += 1;
            next.collections.insert(name.clone(), coll);
        }

        persist(&next)?;
        *image = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> SharedStore {
        let store = SharedStore::new();
        let mut txn = store.begin_upgrade(1).unwrap();
        for name in names {
            txn.create_collection(name).unwrap();
        }
        store.commit(txn, |_| Ok(())).unwrap();
        store
    }

    #[test]
    fn upgrade_creates_collections_and_sets_version() {
        let store = store_with(&["a", "b"]);
        assert_eq!(store.version(), 1);
        assert_eq!(store.collection_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn upgrade_can_drop_collections() {
        let store = store_with(&["a", "b"]);
        let mut txn = store.begin_upgrade(2).unwrap();
        txn.delete_collection("a").unwrap();
        store.commit(txn, |_| Ok(())).unwrap();
        assert_eq!(store.version(), 2);
        assert_eq!(store.collection_names(), vec!["b".to_string()]);
    }

    #[test]
    fn upgrade_must_increase_version() {
        let store = store_with(&["a"]);
        assert!(matches!(
            store.begin_upgrade(1),
            Err(StorageError::Version(_))
        ));
    }

    #[test]
    fn concurrent_writers_conflict() {
        let store = store_with(&["a"]);
        let mut first = store.begin(TxnMode::ReadWrite, &["a"]).unwrap();
        let mut second = store.begin(TxnMode::ReadWrite, &["a"]).unwrap();
        first.put("a", b"k".to_vec(), b"1".to_vec()).unwrap();
        second.put("a", b"k".to_vec(), b"2".to_vec()).unwrap();

        store.commit(first, |_| Ok(())).unwrap();
        assert!(matches!(
            store.commit(second, |_| Ok(())),
            Err(StorageError::Conflict(_))
        ));
    }

    #[test]
    fn failed_persist_leaves_store_unchanged() {
        let store = store_with(&["a"]);
        let mut txn = store.begin(TxnMode::ReadWrite, &["a"]).unwrap();
        txn.put("a", b"k".to_vec(), b"v".to_vec()).unwrap();
        let result = store.commit(txn, |_| Err(StorageError::corrupted("disk full")));
        assert!(result.is_err());

        let txn = store.begin(TxnMode::ReadOnly, &["a"]).unwrap();
        assert_eq!(txn.get("a", b"k").unwrap(), None);
    }

    #[test]
    fn unknown_collection_rejected() {
        let store = store_with(&["a"]);
        assert!(matches!(
            store.begin(TxnMode::ReadOnly, &["missing"]),
            Err(StorageError::UnknownCollection(_))
        ));
    }
}
