//! Indexed storage adapter.
//!
//! The adapter maps documents, revisions and attachments onto the
//! collections of a [`KvEngine`]. Every operation runs inside one engine
//! transaction; callers serialize writers.

mod bulk;
mod changes;
mod compaction;
pub mod cursor;
mod docs;
pub mod migration;
mod purge;
mod read;
pub mod schema;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::{Revision, Seq};
use schema::{
    attach_seq_key, attach_seq_prefix, decode_seq, doc_rev_key, meta_key, seq_key, DocMetadata,
    MetaRecord, SeqRecord, ATTACH_SEQ_BY_SEQ, ATTACH_SEQ_STORE, ATTACH_STORE, BY_SEQ,
    DOC_REV_INDEX, DOC_STORE, META_STORE,
};
use sofadb_storage::{KeyRange, KvEngine, KvTransaction, StorageError, TxnMode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// A document store over one key-value engine.
#[derive(Debug)]
pub struct Adapter {
    engine: Arc<dyn KvEngine>,
    config: Config,
}

impl Adapter {
    /// Opens the adapter, upgrading the engine's schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails or the stored schema is newer
    /// than this build understands.
    pub fn open(engine: Arc<dyn KvEngine>, config: Config) -> CoreResult<Self> {
        let run = migration::MigrationManager::standard().run_pending(engine.as_ref())?;
        info!(
            db = engine.name(),
            adapter = engine.kind(),
            version = run.final_version,
            migrations = run.migrations.len(),
            "opened database"
        );
        Ok(Self { engine, config })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Engine kind, reported as the adapter name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.engine.kind()
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn read_txn(&self, stores: &[&str]) -> CoreResult<KvTransaction> {
        Ok(self.engine.begin(TxnMode::ReadOnly, stores)?)
    }

    fn write_txn(&self, stores: &[&str]) -> CoreResult<KvTransaction> {
        Ok(self.engine.begin(TxnMode::ReadWrite, stores)?)
    }

    fn commit(&self, txn: KvTransaction) -> CoreResult<()> {
        Ok(self.engine.commit(txn)?)
    }

    fn batch_fetch(&self) -> bool {
        self.engine.supports_batch_fetch()
    }
}

pub(crate) fn load_metadata(txn: &KvTransaction, id: &str) -> CoreResult<Option<DocMetadata>> {
    txn.get(DOC_STORE, id.as_bytes())?
        .map(|bytes| DocMetadata::decode(&bytes))
        .transpose()
}

pub(crate) fn store_metadata(txn: &mut KvTransaction, meta: &DocMetadata) -> CoreResult<()> {
    txn.put(DOC_STORE, meta.id.as_bytes().to_vec(), meta.encode()?)?;
    Ok(())
}

pub(crate) fn load_meta(txn: &KvTransaction) -> CoreResult<MetaRecord> {
    let bytes = txn
        .get(META_STORE, &meta_key())?
        .ok_or_else(|| StorageError::corrupted("database metadata record is missing"))?;
    MetaRecord::decode(&bytes)
}

pub(crate) fn store_meta(txn: &mut KvTransaction, meta: &MetaRecord) -> CoreResult<()> {
    txn.put(META_STORE, meta_key(), meta.encode()?)?;
    Ok(())
}

pub(crate) fn load_seq(txn: &KvTransaction, seq: Seq) -> CoreResult<Option<SeqRecord>> {
    txn.get(BY_SEQ, &seq_key(seq))?
        .map(|bytes| SeqRecord::decode(&bytes))
        .transpose()
}

/// Loads the stored body of `rev`, or `None` if it was compacted away.
pub(crate) fn load_rev(
    txn: &KvTransaction,
    meta: &DocMetadata,
    rev: &Revision,
) -> CoreResult<Option<SeqRecord>> {
    match meta.rev_map.get(rev) {
        Some(&seq) => load_seq(txn, seq),
        None => Ok(None),
    }
}

/// Deletes a sequence record with its index entry and attachment
/// junctions. Returns the digests it referenced.
pub(crate) fn drop_sequence(txn: &mut KvTransaction, seq: Seq) -> CoreResult<Vec<String>> {
    let key = seq_key(seq);
    if let Some(record) = load_seq(txn, seq)? {
        let index_key = doc_rev_key(&record.doc_id, &record.rev);
        if let Some(indexed) = txn.get(DOC_REV_INDEX, &index_key)? {
            if decode_seq(&indexed)? == seq {
                txn.delete(DOC_REV_INDEX, &index_key)?;
            }
        }
    }
    txn.delete(BY_SEQ, &key)?;

    let junctions = txn.get_all(ATTACH_SEQ_BY_SEQ, &KeyRange::prefix(key.clone()), false, None)?;
    let mut digests = Vec::with_capacity(junctions.len());
    for (junction, _) in junctions {
        let digest = String::from_utf8_lossy(&junction[key.len()..]).into_owned();
        txn.delete(ATTACH_SEQ_BY_SEQ, &junction)?;
        txn.delete(ATTACH_SEQ_STORE, &attach_seq_key(&digest, seq))?;
        digests.push(digest);
    }
    debug!(seq, attachments = digests.len(), "dropped sequence");
    Ok(digests)
}

/// Deletes attachment bodies no sequence references any more.
pub(crate) fn remove_orphan_attachments(
    txn: &mut KvTransaction,
    digests: impl IntoIterator<Item = String>,
) -> CoreResult<usize> {
    let mut removed = 0;
    for digest in digests.into_iter().collect::<BTreeSet<_>>() {
        let referenced = txn.count(ATTACH_SEQ_STORE, &KeyRange::prefix(attach_seq_prefix(&digest)))?;
        if referenced == 0 && txn.delete(ATTACH_STORE, digest.as_bytes())? {
            debug!(%digest, "removed orphaned attachment");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Maps a missing metadata record to the not-found error for `id`.
pub(crate) fn require_metadata(meta: Option<DocMetadata>, id: &str) -> CoreResult<DocMetadata> {
    meta.ok_or_else(|| CoreError::missing(id))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sofadb_storage::MemoryEngine;

    /// An adapter over a fresh in-memory engine.
    pub(crate) fn adapter_with(config: Config) -> Adapter {
        Adapter::open(Arc::new(MemoryEngine::standalone("test")), config).unwrap()
    }

    pub(crate) fn adapter() -> Adapter {
        adapter_with(Config::default())
    }

    #[test]
    fn open_creates_current_schema() {
        let adapter = adapter();
        assert_eq!(
            adapter.engine().schema_version().unwrap(),
            schema::SCHEMA_VERSION
        );
        let txn = adapter.read_txn(&[META_STORE]).unwrap();
        let meta = load_meta(&txn).unwrap();
        assert_eq!(meta.doc_count, 0);
        assert!(!meta.instance_id.is_empty());
    }

    #[test]
    fn reopen_keeps_instance_id() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::standalone("again"));
        let first = Adapter::open(Arc::clone(&engine), Config::default()).unwrap();
        let id = load_meta(&first.read_txn(&[META_STORE]).unwrap())
            .unwrap()
            .instance_id;
        let second = Adapter::open(engine, Config::default()).unwrap();
        let again = load_meta(&second.read_txn(&[META_STORE]).unwrap())
            .unwrap()
            .instance_id;
        assert_eq!(id, again);
    }
}
