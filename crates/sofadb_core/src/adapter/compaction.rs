//! Revision body compaction.
//!
//! Compaction removes the stored bodies of non-leaf revisions farther than
//! the retention depth from every leaf. Tree structure is kept: compacted
//! revisions stay in the tree as missing, so replication still sees the
//! full ancestry.
//!
//! ## Invariants
//!
//! - Leaf bodies are never removed
//! - An attachment body is removed only when no sequence references it
//! - A document's winner and deletion state do not change

use super::cursor::run_batched_cursor;
use super::schema::{DocMetadata, ALL_STORES, DOC_STORE};
use super::{drop_sequence, remove_orphan_attachments, store_metadata, Adapter};
use crate::error::CoreResult;
use crate::options::CompactionResult;
use sofadb_storage::{KeyRange, KvTransaction};
use std::ops::ControlFlow;
use tracing::{debug, info};

/// Outcome of compacting one document.
#[derive(Debug, Default)]
pub(crate) struct DocCompaction {
    /// Revision bodies removed.
    pub revs: usize,
    /// Digests referenced by the removed bodies.
    pub released: Vec<String>,
}

/// Compacts one document in place. The caller stores `meta` and removes
/// orphaned attachments.
pub(crate) fn compact_document(
    txn: &mut KvTransaction,
    meta: &mut DocMetadata,
    retention: u64,
) -> CoreResult<DocCompaction> {
    let mut outcome = DocCompaction::default();
    for rev in meta.rev_tree.compaction_candidates(retention) {
        meta.rev_tree.mark_missing(&rev);
        if let Some(seq) = meta.rev_map.remove(&rev) {
            outcome.released.extend(drop_sequence(txn, seq)?);
        }
        outcome.revs += 1;
    }
    Ok(outcome)
}

impl Adapter {
    /// Compacts every document in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub(crate) fn compact(&self, retention: u64) -> CoreResult<CompactionResult> {
        let mut txn = self.write_txn(ALL_STORES)?;
        let mut stored = Vec::new();
        run_batched_cursor(
            &txn,
            DOC_STORE,
            &KeyRange::all(),
            false,
            self.config.cursor_batch_size,
            self.batch_fetch(),
            |_, values, _| {
                stored.extend(values);
                Ok(ControlFlow::Continue(()))
            },
        )?;

        let mut result = CompactionResult {
            docs_scanned: stored.len(),
            ..CompactionResult::default()
        };
        let mut released = Vec::new();
        for bytes in stored {
            let mut meta = DocMetadata::decode(&bytes)?;
            let outcome = compact_document(&mut txn, &mut meta, retention)?;
            if outcome.revs > 0 {
                debug!(id = %meta.id, revs = outcome.revs, "compacted document");
                store_metadata(&mut txn, &meta)?;
                result.revs_compacted += outcome.revs;
                released.extend(outcome.released);
            }
        }
        result.attachments_removed = remove_orphan_attachments(&mut txn, released)?;
        self.commit(txn)?;

        info!(
            db = self.name(),
            docs = result.docs_scanned,
            revs = result.revs_compacted,
            attachments = result.attachments_removed,
            "compaction complete"
        );
        Ok(result)
    }
}
