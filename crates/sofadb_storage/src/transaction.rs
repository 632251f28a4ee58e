//! Transactions over a store image.

use crate::error::{StorageError, StorageResult};
use crate::range::KeyRange;
use crate::store::Collection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes within the declared collections.
    ReadWrite,
    /// Schema change: may create and delete collections and bumps the version.
    VersionChange,
}

/// A transaction spanning a fixed set of collections.
///
/// A transaction reads from the snapshot taken when it began. Writes are
/// staged privately (the touched collection is copied on first write) and
/// become visible atomically when the owning engine commits it. Dropping a
/// transaction without committing discards it.
#[derive(Debug)]
pub struct KvTransaction {
    mode: TxnMode,
    collections: BTreeMap<String, Arc<Collection>>,
    base_generations: BTreeMap<String, u64>,
    dirty: BTreeSet<String>,
    deleted: BTreeSet<String>,
    target_version: Option<u32>,
}

/// Decomposed transaction handed back to the store on commit.
pub(crate) struct TxnParts {
    pub(crate) mode: TxnMode,
    pub(crate) collections: BTreeMap<String, Arc<Collection>>,
    pub(crate) base_generations: BTreeMap<String, u64>,
    pub(crate) dirty: BTreeSet<String>,
    pub(crate) deleted: BTreeSet<String>,
    pub(crate) target_version: Option<u32>,
}

impl KvTransaction {
    pub(crate) fn new(
        mode: TxnMode,
        collections: BTreeMap<String, Arc<Collection>>,
        target_version: Option<u32>,
    ) -> Self {
        let base_generations = collections
            .iter()
            .map(|(name, coll)| (name.clone(), coll.generation))
            .collect();
        Self {
            mode,
            collections,
            base_generations,
            dirty: BTreeSet::new(),
            deleted: BTreeSet::new(),
            target_version,
        }
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the version an upgrade transaction moves the schema to.
    #[must_use]
    pub fn target_version(&self) -> Option<u32> {
        self.target_version
    }

    /// Names of the collections visible to this transaction.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Returns true if the collection is visible to this transaction.
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty() || self.target_version.is_some()
    }

    pub(crate) fn into_parts(self) -> TxnParts {
        TxnParts {
            mode: self.mode,
            collections: self.collections,
            base_generations: self.base_generations,
            dirty: self.dirty,
            deleted: self.deleted,
            target_version: self.target_version,
        }
    }

    fn collection(&self, name: &str) -> StorageResult<&Arc<Collection>> {
        self.collections
            .get(name)
            .ok_or_else(|| StorageError::OutOfScope(name.to_string()))
    }

    fn collection_mut(&mut self, name: &str) -> StorageResult<&mut Collection> {
        if self.mode == TxnMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        let coll = self
            .collections
            .get_mut(name)
            .ok_or_else(|| StorageError::OutOfScope(name.to_string()))?;
        self.dirty.insert(name.to_string());
        Ok(Arc::make_mut(coll))
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, collection: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.collection(collection)?.entries.get(key).cloned())
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, collection: &str, key: &[u8]) -> StorageResult<bool> {
        Ok(self.collection(collection)?.entries.contains_key(key))
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, collection: &str, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.collection_mut(collection)?.entries.insert(key, value);
        Ok(())
    }

    /// Inserts a value, failing with [`StorageError::Constraint`] if the key exists.
    pub fn add(&mut self, collection: &str, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let coll = self.collection_mut(collection)?;
        if coll.entries.contains_key(&key) {
            return Err(StorageError::Constraint {
                collection: collection.to_string(),
            });
        }
        coll.entries.insert(key, value);
        Ok(())
    }

    /// Inserts a value under the next auto-increment key and returns that key.
    ///
    /// Keys start at 1, are encoded big-endian so they sort numerically, and
    /// are never handed out twice even after deletion.
    pub fn add_auto(&mut self, collection: &str, value: Vec<u8>) -> StorageResult<u64> {
        let coll = self.collection_mut(collection)?;
        coll.last_auto += 1;
        let key = coll.last_auto;
        coll.entries.insert(key.to_be_bytes().to_vec(), value);
        Ok(key)
    }

    /// Last key handed out by [`Self::add_auto`], or 0.
    pub fn last_auto_key(&self, collection: &str) -> StorageResult<u64> {
        Ok(self.collection(collection)?.last_auto)
    }

    /// Removes a key. Returns true if it was present.
    pub fn delete(&mut self, collection: &str, key: &[u8]) -> StorageResult<bool> {
        Ok(self.collection_mut(collection)?.entries.remove(key).is_some())
    }

    /// Removes every key in `range`. Returns the number removed.
    pub fn delete_range(&mut self, collection: &str, range: &KeyRange) -> StorageResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let coll = self.collection_mut(collection)?;
        let keys: Vec<Vec<u8>> = coll
            .entries
            .range::<[u8], _>(range.as_bounds())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            coll.entries.remove(key);
        }
        Ok(keys.len())
    }

    /// Fetches up to `limit` entries of `range` in one call.
    pub fn get_all(
        &self,
        collection: &str,
        range: &KeyRange,
        descending: bool,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let coll = self.collection(collection)?;
        Ok(scan(coll, range, descending, limit.unwrap_or(usize::MAX)))
    }

    /// Counts the entries in `range`.
    pub fn count(&self, collection: &str, range: &KeyRange) -> StorageResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let coll = self.collection(collection)?;
        Ok(coll.entries.range::<[u8], _>(range.as_bounds()).count())
    }

    /// Opens a cursor that yields one entry per advance.
    pub fn cursor(
        &self,
        collection: &str,
        range: KeyRange,
        descending: bool,
    ) -> StorageResult<KvCursor> {
        Ok(KvCursor {
            collection: Arc::clone(self.collection(collection)?),
            range,
            descending,
            done: false,
        })
    }

    /// Creates a collection. Only valid in a version-change transaction.
    ///
    /// Creating an existing collection is a no-op.
    pub fn create_collection(&mut self, name: &str) -> StorageResult<()> {
        self.require_version_change()?;
        if !self.collections.contains_key(name) {
            self.collections
                .insert(name.to_string(), Arc::new(Collection::default()));
            self.dirty.insert(name.to_string());
            self.deleted.remove(name);
        }
        Ok(())
    }

    /// Deletes a collection. Only valid in a version-change transaction.
    pub fn delete_collection(&mut self, name: &str) -> StorageResult<()> {
        self.require_version_change()?;
        if self.collections.remove(name).is_some() {
            self.dirty.remove(name);
            self.deleted.insert(name.to_string());
        }
        Ok(())
    }

    fn require_version_change(&self) -> StorageResult<()> {
        if self.mode == TxnMode::VersionChange {
            Ok(())
        } else {
            Err(StorageError::Version(
                "collections can only change in an upgrade transaction".into(),
            ))
        }
    }
}

fn scan(
    coll: &Collection,
    range: &KeyRange,
    descending: bool,
    limit: usize,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    if range.is_empty() || limit == 0 {
        return Vec::new();
    }
    let iter = coll.entries.range::<[u8], _>(range.as_bounds());
    let clone = |(k, v): (&Vec<u8>, &Vec<u8>)| (k.clone(), v.clone());
    if descending {
        iter.rev().take(limit).map(clone).collect()
    } else {
        iter.take(limit).map(clone).collect()
    }
}

/// A cursor that advances one entry at a time.
///
/// The cursor reads the snapshot its transaction saw when it was opened.
#[derive(Debug)]
pub struct KvCursor {
    collection: Arc<Collection>,
    range: KeyRange,
    descending: bool,
    done: bool,
}

impl Iterator for KvCursor {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some((key, value)) = scan(&self.collection, &self.range, self.descending, 1).pop()
        else {
            self.done = true;
            return None;
        };
        self.range = if self.descending {
            self.range.with_upper(key.clone(), true)
        } else {
            self.range.with_lower(key.clone(), true)
        };
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn txn(mode: TxnMode) -> KvTransaction {
        let mut collections = BTreeMap::new();
        let mut coll = Collection::default();
        for i in 1u8..=5 {
            coll.entries.insert(vec![i], vec![i * 10]);
        }
        collections.insert("c".to_string(), Arc::new(coll));
        KvTransaction::new(mode, collections, None)
    }

    #[test]
    fn read_only_rejects_writes() {
        let mut t = txn(TxnMode::ReadOnly);
        assert_eq!(
            t.put("c", vec![9], vec![9]),
            Err(StorageError::ReadOnly)
        );
    }

    #[test]
    fn out_of_scope_collection() {
        let t = txn(TxnMode::ReadOnly);
        assert!(matches!(t.get("other", b"k"), Err(StorageError::OutOfScope(_))));
    }

    #[test]
    fn add_rejects_existing_key() {
        let mut t = txn(TxnMode::ReadWrite);
        assert!(matches!(
            t.add("c", vec![1], vec![0]),
            Err(StorageError::Constraint { .. })
        ));
        t.add("c", vec![6], vec![60]).unwrap();
        assert_eq!(t.get("c", &[6]).unwrap(), Some(vec![60]));
    }

    #[test]
    fn auto_keys_are_never_reused() {
        let mut t = txn(TxnMode::ReadWrite);
        let first = t.add_auto("c", vec![]).unwrap();
        t.delete("c", &first.to_be_bytes()).unwrap();
        let second = t.add_auto("c", vec![]).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(t.last_auto_key("c").unwrap(), 2);
    }

    #[test]
    fn get_all_respects_direction_and_limit() {
        let t = txn(TxnMode::ReadOnly);
        let rows = t
            .get_all("c", &KeyRange::lower_bound(vec![2], true), false, Some(2))
            .unwrap();
        assert_eq!(rows, vec![(vec![3], vec![30]), (vec![4], vec![40])]);

        let rows = t.get_all("c", &KeyRange::all(), true, Some(2)).unwrap();
        assert_eq!(rows, vec![(vec![5], vec![50]), (vec![4], vec![40])]);
    }

    #[test]
    fn cursor_walks_range_one_row_at_a_time() {
        let t = txn(TxnMode::ReadOnly);
        let keys: Vec<Vec<u8>> = t
            .cursor("c", KeyRange::between(vec![2], vec![4], false, false), true)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![4], vec![3], vec![2]]);
    }

    #[test]
    fn delete_range_and_count() {
        let mut t = txn(TxnMode::ReadWrite);
        let removed = t
            .delete_range("c", &KeyRange::between(vec![2], vec![3], false, false))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(t.count("c", &KeyRange::all()).unwrap(), 3);
    }

    #[test]
    fn snapshot_is_isolated_from_writes() {
        let mut t = txn(TxnMode::ReadWrite);
        let cursor = t.cursor("c", KeyRange::all(), false).unwrap();
        assert_eq!(t.delete_range("c", &KeyRange::all()).unwrap(), 5);
        assert_eq!(cursor.count(), 5);
        assert_eq!(t.count("c", &KeyRange::all()).unwrap(), 0);
    }

    type Endpoint = Option<(Vec<u8>, bool)>;

    fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(0u8..4, 0..3)
    }

    fn endpoint_strategy() -> impl Strategy<Value = Endpoint> {
        proptest::option::of((key_strategy(), any::<bool>()))
    }

    fn range_of(lower: &Endpoint, upper: &Endpoint) -> KeyRange {
        match (lower.clone(), upper.clone()) {
            (None, None) => KeyRange::all(),
            (Some((lo, open)), None) => KeyRange::lower_bound(lo, open),
            (None, Some((hi, open))) => KeyRange::upper_bound(hi, open),
            (Some((lo, lo_open)), Some((hi, hi_open))) => {
                KeyRange::between(lo, hi, lo_open, hi_open)
            }
        }
    }

    fn in_model_range(key: &[u8], lower: &Endpoint, upper: &Endpoint) -> bool {
        let above = lower
            .as_ref()
            .map_or(true, |(lo, open)| if *open { key > &lo[..] } else { key >= &lo[..] });
        let below = upper
            .as_ref()
            .map_or(true, |(hi, open)| if *open { key < &hi[..] } else { key <= &hi[..] });
        above && below
    }

    proptest! {
        #[test]
        fn scans_match_ordered_map(
            entries in proptest::collection::btree_map(key_strategy(), any::<u8>(), 0..20),
            lower in endpoint_strategy(),
            upper in endpoint_strategy(),
            descending in any::<bool>(),
            limit in proptest::option::of(0usize..8),
        ) {
            let mut coll = Collection::default();
            for (k, v) in &entries {
                coll.entries.insert(k.clone(), vec![*v]);
            }
            let mut collections = BTreeMap::new();
            collections.insert("c".to_string(), Arc::new(coll));
            let mut t = KvTransaction::new(TxnMode::ReadWrite, collections, None);
            let range = range_of(&lower, &upper);

            let mut expected: Vec<(Vec<u8>, Vec<u8>)> = entries
                .iter()
                .filter(|(k, _)| in_model_range(k, &lower, &upper))
                .map(|(k, v)| (k.clone(), vec![*v]))
                .collect();
            prop_assert_eq!(t.count("c", &range).unwrap(), expected.len());

            let cursor_keys: Vec<Vec<u8>> = t
                .cursor("c", range.clone(), descending)
                .unwrap()
                .map(|(k, _)| k)
                .collect();
            if descending {
                expected.reverse();
            }
            let expected_keys: Vec<Vec<u8>> = expected.iter().map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(cursor_keys, expected_keys);

            let total = expected.len();
            expected.truncate(limit.unwrap_or(usize::MAX));
            prop_assert_eq!(t.get_all("c", &range, descending, limit).unwrap(), expected);

            prop_assert_eq!(t.delete_range("c", &range).unwrap(), total);
            prop_assert_eq!(t.count("c", &KeyRange::all()).unwrap(), entries.len() - total);
        }
    }
}
