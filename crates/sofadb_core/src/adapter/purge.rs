//! Purging leaf revisions.

use super::schema::{ALL_STORES, DOC_STORE};
use super::{
    drop_sequence, load_meta, load_metadata, remove_orphan_attachments, require_metadata,
    store_meta, store_metadata, Adapter,
};
use crate::error::{CoreError, CoreResult};
use crate::options::PurgeResult;
use crate::types::Revision;
use tracing::info;

impl Adapter {
    /// Removes leaf `rev` of `id` and the ancestors only it used.
    ///
    /// Purged revisions vanish entirely; the document's metadata is deleted
    /// when its tree becomes empty.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the document is unknown or `rev` is not one
    /// of its leaves.
    pub(crate) fn purge(&self, id: &str, rev: &Revision) -> CoreResult<PurgeResult> {
        let mut txn = self.write_txn(ALL_STORES)?;
        let mut meta = require_metadata(load_metadata(&txn, id)?, id)?;
        let was_live = !meta.deleted;
        let purged = meta
            .rev_tree
            .remove_leaf(rev)
            .ok_or_else(|| CoreError::missing(id))?;

        let mut released = Vec::new();
        for removed in &purged {
            if let Some(seq) = meta.rev_map.remove(removed) {
                released.extend(drop_sequence(&mut txn, seq)?);
            }
        }
        remove_orphan_attachments(&mut txn, released)?;

        let is_live = if meta.rev_tree.is_empty() {
            txn.delete(DOC_STORE, id.as_bytes())?;
            false
        } else {
            meta.refresh_winner();
            meta.seq = meta.rev_map.values().copied().max().unwrap_or(meta.seq);
            store_metadata(&mut txn, &meta)?;
            !meta.deleted
        };

        let mut db_meta = load_meta(&txn)?;
        db_meta.purge_seq += 1;
        db_meta.doc_count = db_meta
            .doc_count
            .saturating_add_signed(i64::from(is_live) - i64::from(was_live));
        store_meta(&mut txn, &db_meta)?;
        self.commit(txn)?;

        info!(db = self.name(), %id, %rev, revs = purged.len(), "purged revision");
        Ok(PurgeResult {
            purged,
            purge_seq: db_meta.purge_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::schema::{ATTACH_STORE, BY_SEQ};
    use super::super::tests::adapter;
    use super::*;
    use crate::document::parse_edit;
    use crate::error::ErrorKind;
    use serde_json::json;
    use sofadb_storage::KeyRange;

    fn replicate(adapter: &Adapter, docs: Vec<serde_json::Value>) {
        let edits = docs
            .into_iter()
            .map(|d| parse_edit(d, false, String::new))
            .collect();
        adapter.bulk_docs(edits, false).unwrap();
    }

    #[test]
    fn purging_a_conflict_keeps_the_winner() {
        let adapter = adapter();
        replicate(
            &adapter,
            vec![
                json!({"_id": "d", "_rev": "2-b", "_revisions": {"start": 2, "ids": ["b", "a"]}}),
                json!({"_id": "d", "_rev": "2-c", "_revisions": {"start": 2, "ids": ["c", "a"]}}),
            ],
        );
        let result = adapter.purge("d", &Revision::new(2, "b")).unwrap();
        assert_eq!(result.purged, vec![Revision::new(2, "b")]);
        assert_eq!(result.purge_seq, 1);

        let txn = adapter.read_txn(ALL_STORES).unwrap();
        let meta = load_metadata(&txn, "d").unwrap().unwrap();
        assert_eq!(meta.winning_rev, Revision::new(2, "c"));
        assert!(meta.rev_tree.collect_conflicts().is_empty());
        assert_eq!(load_meta(&txn).unwrap().doc_count, 1);
    }

    #[test]
    fn purging_the_last_leaf_removes_the_document() {
        let adapter = adapter();
        let data = sofadb_codec::encode_base64(b"bytes");
        replicate(
            &adapter,
            vec![json!({"_id": "d", "_rev": "1-a", "_attachments": {"f": {"content_type": "x/y", "data": data}}})],
        );
        adapter.purge("d", &Revision::new(1, "a")).unwrap();

        let txn = adapter.read_txn(ALL_STORES).unwrap();
        assert!(load_metadata(&txn, "d").unwrap().is_none());
        assert_eq!(txn.count(BY_SEQ, &KeyRange::all()).unwrap(), 0);
        assert_eq!(txn.count(ATTACH_STORE, &KeyRange::all()).unwrap(), 0);
        assert_eq!(load_meta(&txn).unwrap().doc_count, 0);
    }

    #[test]
    fn purging_unknown_revisions_is_missing() {
        let adapter = adapter();
        replicate(&adapter, vec![json!({"_id": "d", "_rev": "1-a"})]);
        let err = adapter.purge("d", &Revision::new(1, "zz")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingDoc);
        let err = adapter.purge("nope", &Revision::new(1, "a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingDoc);
    }
}
