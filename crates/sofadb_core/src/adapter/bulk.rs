//! Bulk write pipeline.
//!
//! A batch runs in one read-write transaction over every collection.
//! Entries are applied in `(id, generation)` order so edits of the same
//! document chain inside one batch; results are reported in input order.
//! A document-level failure only affects its own entry; any other failure
//! aborts the whole batch.

use super::compaction::compact_document;
use super::schema::{
    attach_seq_key, decode_seq, doc_rev_key, seq_attach_key, seq_key, AttachmentRef, DocMetadata,
    LocalRecord, SeqRecord, ALL_STORES, ATTACH_SEQ_BY_SEQ, ATTACH_SEQ_STORE, ATTACH_STORE,
    BY_SEQ, DOC_REV_INDEX, LOCAL_STORE,
};
use super::{
    drop_sequence, load_meta, load_metadata, load_rev, load_seq, remove_orphan_attachments,
    store_meta, store_metadata, Adapter,
};
use crate::config::Config;
use crate::document::{parse_local_rev, AttachmentInput, Edit, LocalEdit, ParsedDoc};
use crate::error::{CoreError, CoreResult};
use crate::options::WriteResult;
use crate::rev_tree::{MergeOutcome, RevTree};
use crate::types::{Revision, Seq};
use serde_json::{Map, Value};
use sofadb_codec::{attachment_digest, rev_hash};
use sofadb_storage::{KvTransaction, StorageError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Result of a committed batch.
#[derive(Debug)]
pub(crate) struct BulkOutcome {
    /// One entry per input, in input order.
    pub results: Vec<CoreResult<WriteResult>>,
    /// Highest sequence written, if any entry produced one.
    pub update_seq: Option<Seq>,
}

impl Adapter {
    /// Applies a batch of parsed edits.
    ///
    /// `new_edits == false` stores supplied revision paths as-is.
    ///
    /// # Errors
    ///
    /// Returns an error, and writes nothing, if a failure is not specific
    /// to one document.
    pub(crate) fn bulk_docs(
        &self,
        edits: Vec<CoreResult<Edit>>,
        new_edits: bool,
    ) -> CoreResult<BulkOutcome> {
        let mut results: Vec<Option<CoreResult<WriteResult>>> = vec![None; edits.len()];
        let mut queue = Vec::with_capacity(edits.len());
        for (slot, edit) in edits.into_iter().enumerate() {
            match edit {
                Ok(edit) => queue.push((slot, edit)),
                Err(e) => results[slot] = Some(Err(e)),
            }
        }
        queue.sort_by(|(_, a), (_, b)| {
            a.id()
                .cmp(b.id())
                .then_with(|| generation(a).cmp(&generation(b)))
        });

        let mut writer = BatchWriter::new(self.write_txn(ALL_STORES)?, &self.config);
        for (slot, edit) in queue {
            let outcome = match edit {
                Edit::Versioned(doc) if new_edits => writer.write_new_edit(doc),
                Edit::Versioned(doc) => writer.write_replicated(doc),
                Edit::Local(doc) => writer.write_local(doc),
            };
            match outcome {
                Err(e) if !e.is_document_error() => return Err(e),
                outcome => results[slot] = Some(outcome),
            }
        }

        let (txn, update_seq) = writer.finish()?;
        self.commit(txn)?;
        debug!(db = self.name(), entries = results.len(), ?update_seq, "committed batch");

        let results = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(CoreError::bad_request("entry was not processed"))))
            .collect();
        Ok(BulkOutcome {
            results,
            update_seq,
        })
    }
}

fn generation(edit: &Edit) -> u64 {
    match edit {
        Edit::Versioned(doc) => doc.rev.as_ref().map_or(0, |r| r.pos),
        Edit::Local(_) => 0,
    }
}

/// Resolved attachments of one revision plus bodies still to store.
struct ResolvedAttachments {
    refs: BTreeMap<String, AttachmentRef>,
    blobs: Vec<(String, Vec<u8>)>,
}

/// A revision ready to be stored.
struct NewRevision {
    path: Vec<Revision>,
    deleted: bool,
    body: Map<String, Value>,
    attachments: ResolvedAttachments,
}

/// State of one batch.
struct BatchWriter<'a> {
    txn: KvTransaction,
    config: &'a Config,
    docs: HashMap<String, Option<DocMetadata>>,
    dirty: BTreeSet<String>,
    doc_count_delta: i64,
    update_seq: Option<Seq>,
}

impl<'a> BatchWriter<'a> {
    fn new(txn: KvTransaction, config: &'a Config) -> Self {
        Self {
            txn,
            config,
            docs: HashMap::new(),
            dirty: BTreeSet::new(),
            doc_count_delta: 0,
            update_seq: None,
        }
    }

    /// Metadata of `id` as of the batch so far.
    fn metadata(&mut self, id: &str) -> CoreResult<Option<DocMetadata>> {
        if let Some(meta) = self.docs.get(id) {
            return Ok(meta.clone());
        }
        let meta = load_metadata(&self.txn, id)?;
        self.docs.insert(id.to_string(), meta.clone());
        Ok(meta)
    }

    fn write_new_edit(&mut self, doc: ParsedDoc) -> CoreResult<WriteResult> {
        let existing = self.metadata(&doc.id)?;
        let parent = match (doc.rev.as_ref(), existing.as_ref()) {
            (Some(rev), Some(meta)) if meta.rev_tree.is_leaf(rev) => Some(rev.clone()),
            (None, None) => None,
            (None, Some(meta)) if meta.deleted => Some(meta.winning_rev.clone()),
            _ => return Err(CoreError::rev_conflict(&doc.id)),
        };

        let parent_record = match (parent.as_ref(), existing.as_ref()) {
            (Some(rev), Some(meta)) => load_rev(&self.txn, meta, rev)?,
            _ => None,
        };
        let pos = parent.as_ref().map_or(1, |p| p.pos + 1);
        let attachments =
            self.resolve_attachments(&doc.id, &doc.attachments, parent_record.as_ref(), pos)?;

        let hash = if self.config.deterministic_revs {
            let digests: BTreeMap<String, String> = attachments
                .refs
                .iter()
                .map(|(name, r)| (name.clone(), r.digest.clone()))
                .collect();
            let parent = parent.as_ref().map(ToString::to_string);
            rev_hash(
                parent.as_deref(),
                doc.deleted,
                &Value::Object(doc.body.clone()),
                &digests,
            )?
        } else {
            uuid::Uuid::new_v4().simple().to_string()
        };

        let path = parent
            .into_iter()
            .chain(std::iter::once(Revision::new(pos, hash)))
            .collect();
        let revision = NewRevision {
            path,
            deleted: doc.deleted,
            body: doc.body,
            attachments,
        };
        self.store(doc.id, existing, revision)
    }

    fn write_replicated(&mut self, doc: ParsedDoc) -> CoreResult<WriteResult> {
        let Some(rev) = doc.rev.clone() else {
            return Err(CoreError::bad_request(format!(
                "replicated document {} needs a _rev",
                doc.id
            )));
        };
        let existing = self.metadata(&doc.id)?;
        if existing.as_ref().is_some_and(|m| m.rev_tree.contains(&rev)) {
            trace!(id = %doc.id, %rev, "revision already stored");
            return Ok(WriteResult {
                id: doc.id,
                rev: rev.to_string(),
            });
        }

        let mut path = doc.revisions.clone().unwrap_or_else(|| vec![rev.clone()]);
        path.reverse();
        let parent_record = match (path.len().checked_sub(2), existing.as_ref()) {
            (Some(i), Some(meta)) => load_rev(&self.txn, meta, &path[i])?,
            _ => None,
        };
        let attachments =
            self.resolve_attachments(&doc.id, &doc.attachments, parent_record.as_ref(), rev.pos)?;
        let revision = NewRevision {
            path,
            deleted: doc.deleted,
            body: doc.body,
            attachments,
        };
        self.store(doc.id, existing, revision)
    }

    /// Resolves attachment inputs against stored bodies.
    ///
    /// Stubs keep the parent's reference unless they name a different
    /// digest, which must already be stored.
    fn resolve_attachments(
        &self,
        id: &str,
        inputs: &BTreeMap<String, AttachmentInput>,
        parent: Option<&SeqRecord>,
        pos: u64,
    ) -> CoreResult<ResolvedAttachments> {
        let mut refs = BTreeMap::new();
        let mut blobs = Vec::new();
        for (name, input) in inputs {
            let inherited = parent.and_then(|p| p.attachments.get(name));
            let reference = match input {
                AttachmentInput::Stub { digest } => match (digest, inherited) {
                    (None, Some(known)) => known.clone(),
                    (Some(d), Some(known)) if *d == known.digest => known.clone(),
                    (Some(d), _) => {
                        let Some(body) = self.txn.get(ATTACH_STORE, d.as_bytes())? else {
                            return Err(CoreError::missing_stub(id, name));
                        };
                        AttachmentRef {
                            digest: d.clone(),
                            content_type: inherited.map_or_else(
                                || "application/octet-stream".to_string(),
                                |k| k.content_type.clone(),
                            ),
                            length: body.len() as u64,
                            revpos: pos,
                        }
                    }
                    (None, None) => return Err(CoreError::missing_stub(id, name)),
                },
                AttachmentInput::Inline { content_type, data } => {
                    let digest = attachment_digest(data);
                    let revpos = match inherited {
                        Some(known) if known.digest == digest => known.revpos,
                        _ => pos,
                    };
                    blobs.push((digest.clone(), data.clone()));
                    AttachmentRef {
                        digest,
                        content_type: content_type.clone(),
                        length: data.len() as u64,
                        revpos,
                    }
                }
            };
            if matches!(input, AttachmentInput::Stub { .. })
                && !self.txn.contains(ATTACH_STORE, reference.digest.as_bytes())?
            {
                return Err(CoreError::missing_stub(id, name));
            }
            refs.insert(name.clone(), reference);
        }
        Ok(ResolvedAttachments { refs, blobs })
    }

    fn store(
        &mut self,
        id: String,
        existing: Option<DocMetadata>,
        revision: NewRevision,
    ) -> CoreResult<WriteResult> {
        let was_live = existing.as_ref().is_some_and(|m| !m.deleted);
        let Some(rev) = revision.path.last().cloned() else {
            return Err(CoreError::bad_request("empty revision path"));
        };
        let mut meta = existing.unwrap_or_else(|| DocMetadata {
            id: id.clone(),
            rev_tree: RevTree::new(),
            winning_rev: rev.clone(),
            deleted: revision.deleted,
            seq: 0,
            rev_map: BTreeMap::new(),
        });

        let merged = meta
            .rev_tree
            .merge(&revision.path, revision.deleted, self.config.revs_limit)?;
        if merged.outcome == MergeOutcome::InternalNode {
            return Err(CoreError::rev_conflict(&id));
        }

        for (digest, data) in revision.attachments.blobs {
            if !self.txn.contains(ATTACH_STORE, digest.as_bytes())? {
                self.txn.put(ATTACH_STORE, digest.into_bytes(), data)?;
            }
        }

        let record = SeqRecord {
            doc_id: id.clone(),
            rev: rev.clone(),
            deleted: revision.deleted,
            body: revision.body,
            attachments: revision.attachments.refs,
        };
        let seq = self.append(&record)?;
        meta.rev_map.insert(rev.clone(), seq);
        meta.seq = meta.seq.max(seq);
        self.update_seq = self.update_seq.max(Some(seq));

        let mut released = Vec::new();
        for stemmed in &merged.stemmed {
            if let Some(old) = meta.rev_map.remove(stemmed) {
                released.extend(drop_sequence(&mut self.txn, old)?);
            }
        }
        meta.refresh_winner();
        if self.config.auto_compaction {
            let compacted =
                compact_document(&mut self.txn, &mut meta, self.config.compaction_retention)?;
            released.extend(compacted.released);
        }
        remove_orphan_attachments(&mut self.txn, released)?;

        let is_live = !meta.deleted;
        self.doc_count_delta += i64::from(is_live) - i64::from(was_live);
        trace!(%id, %rev, seq, outcome = ?merged.outcome, "stored revision");
        self.docs.insert(id.clone(), Some(meta));
        self.dirty.insert(id.clone());
        Ok(WriteResult {
            id,
            rev: rev.to_string(),
        })
    }

    /// Appends a sequence record and indexes it.
    ///
    /// If the `(id, rev)` pair is already indexed, the record replaces the
    /// one at the existing sequence instead.
    fn append(&mut self, record: &SeqRecord) -> CoreResult<Seq> {
        let bytes = record.encode()?;
        let seq = self.txn.add_auto(BY_SEQ, bytes.clone())?;
        let index_key = doc_rev_key(&record.doc_id, &record.rev);
        let seq = match self.txn.add(DOC_REV_INDEX, index_key.clone(), seq_key(seq)) {
            Ok(()) => seq,
            Err(StorageError::Constraint { .. }) => {
                let indexed = self
                    .txn
                    .get(DOC_REV_INDEX, &index_key)?
                    .ok_or_else(|| StorageError::corrupted("revision index entry vanished"))?;
                let existing = decode_seq(&indexed)?;
                let owner = load_seq(&self.txn, existing)?;
                if owner.is_some_and(|o| o.doc_id != record.doc_id || o.rev != record.rev) {
                    return Err(StorageError::corrupted(format!(
                        "revision index entry for {} {} points at another document",
                        record.doc_id, record.rev
                    ))
                    .into());
                }
                self.txn.delete(BY_SEQ, &seq_key(seq))?;
                self.txn.put(BY_SEQ, seq_key(existing), bytes)?;
                debug!(id = %record.doc_id, rev = %record.rev, seq = existing, "replaced existing sequence");
                existing
            }
            Err(e) => return Err(e.into()),
        };
        for attachment in record.attachments.values() {
            self.txn
                .put(ATTACH_SEQ_STORE, attach_seq_key(&attachment.digest, seq), Vec::new())?;
            self.txn
                .put(ATTACH_SEQ_BY_SEQ, seq_attach_key(seq, &attachment.digest), Vec::new())?;
        }
        Ok(seq)
    }

    fn write_local(&mut self, edit: LocalEdit) -> CoreResult<WriteResult> {
        let current = self
            .txn
            .get(LOCAL_STORE, edit.id.as_bytes())?
            .map(|bytes| LocalRecord::decode(&bytes))
            .transpose()?;
        match (&current, &edit.rev) {
            (Some(stored), Some(rev)) if stored.rev == *rev => {}
            (None, None) => {}
            (None, Some(_)) if edit.deleted => return Err(CoreError::missing(&edit.id)),
            _ => return Err(CoreError::rev_conflict(&edit.id)),
        }

        let Some(stored) = current else {
            if edit.deleted {
                return Err(CoreError::missing(&edit.id));
            }
            return self.put_local(edit, 1);
        };
        if edit.deleted {
            self.txn.delete(LOCAL_STORE, edit.id.as_bytes())?;
            trace!(id = %edit.id, "removed local document");
            return Ok(WriteResult {
                id: edit.id,
                rev: "0-0".to_string(),
            });
        }
        let next = parse_local_rev(&edit.id, &stored.rev)? + 1;
        self.put_local(edit, next)
    }

    fn put_local(&mut self, edit: LocalEdit, generation: u64) -> CoreResult<WriteResult> {
        let record = LocalRecord {
            id: edit.id,
            rev: format!("0-{generation}"),
            body: edit.body,
        };
        self.txn
            .put(LOCAL_STORE, record.id.as_bytes().to_vec(), record.encode()?)?;
        Ok(WriteResult {
            id: record.id,
            rev: record.rev,
        })
    }

    /// Persists touched metadata and the document count.
    fn finish(mut self) -> CoreResult<(KvTransaction, Option<Seq>)> {
        for id in &self.dirty {
            if let Some(Some(meta)) = self.docs.get(id) {
                store_metadata(&mut self.txn, meta)?;
            }
        }
        if self.doc_count_delta != 0 {
            let mut meta = load_meta(&self.txn)?;
            meta.doc_count = meta.doc_count.saturating_add_signed(self.doc_count_delta);
            store_meta(&mut self.txn, &meta)?;
        }
        Ok((self.txn, self.update_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{adapter, adapter_with};
    use super::*;
    use crate::document::parse_edit;
    use crate::error::ErrorKind;
    use serde_json::json;
    use sofadb_storage::KeyRange;

    fn edits(docs: Vec<Value>, new_edits: bool) -> Vec<CoreResult<Edit>> {
        docs.into_iter()
            .map(|d| parse_edit(d, new_edits, || "generated".to_string()))
            .collect()
    }

    fn write(adapter: &Adapter, docs: Vec<Value>) -> Vec<CoreResult<WriteResult>> {
        adapter.bulk_docs(edits(docs, true), true).unwrap().results
    }

    fn replicate(adapter: &Adapter, docs: Vec<Value>) -> Vec<CoreResult<WriteResult>> {
        adapter.bulk_docs(edits(docs, false), false).unwrap().results
    }

    fn metadata(adapter: &Adapter, id: &str) -> DocMetadata {
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        load_metadata(&txn, id).unwrap().unwrap()
    }

    fn doc_count(adapter: &Adapter) -> u64 {
        load_meta(&adapter.read_txn(ALL_STORES).unwrap())
            .unwrap()
            .doc_count
    }

    #[test]
    fn create_then_update() {
        let adapter = adapter();
        let first = write(&adapter, vec![json!({"_id": "a", "n": 1})]);
        let rev1 = first[0].as_ref().unwrap().rev.clone();
        assert!(rev1.starts_with("1-"));

        let second = write(&adapter, vec![json!({"_id": "a", "_rev": rev1, "n": 2})]);
        let rev2 = second[0].as_ref().unwrap().rev.clone();
        assert!(rev2.starts_with("2-"));

        let meta = metadata(&adapter, "a");
        assert_eq!(meta.winning_rev.to_string(), rev2);
        assert_eq!(meta.seq, 2);
        assert_eq!(doc_count(&adapter), 1);
    }

    #[test]
    fn identical_edits_produce_identical_revisions() {
        let one = adapter();
        let two = adapter();
        let doc = json!({"_id": "x", "v": [1, 2]});
        let a = write(&one, vec![doc.clone()]);
        let b = write(&two, vec![doc]);
        assert_eq!(a[0].as_ref().unwrap().rev, b[0].as_ref().unwrap().rev);
    }

    #[test]
    fn random_revisions_when_not_deterministic() {
        let adapter = adapter_with(Config::default().deterministic_revs(false));
        let result = write(&adapter, vec![json!({"_id": "r"})]);
        let rev = Revision::parse(&result[0].as_ref().unwrap().rev).unwrap();
        assert_eq!(rev.pos, 1);
        assert_eq!(rev.hash.len(), 32);
    }

    #[test]
    fn stale_or_missing_rev_conflicts() {
        let adapter = adapter();
        let rev1 = write(&adapter, vec![json!({"_id": "a"})])[0]
            .as_ref()
            .unwrap()
            .rev
            .clone();
        write(&adapter, vec![json!({"_id": "a", "_rev": rev1, "n": 1})]);

        let stale = write(&adapter, vec![json!({"_id": "a", "_rev": rev1, "n": 2})]);
        assert_eq!(stale[0].as_ref().unwrap_err().kind(), ErrorKind::RevConflict);
        let missing = write(&adapter, vec![json!({"_id": "a"})]);
        assert_eq!(missing[0].as_ref().unwrap_err().kind(), ErrorKind::RevConflict);
        let unknown = write(&adapter, vec![json!({"_id": "new", "_rev": "1-abc"})]);
        assert_eq!(unknown[0].as_ref().unwrap_err().kind(), ErrorKind::RevConflict);
    }

    #[test]
    fn results_keep_input_order_and_chain_within_batch() {
        let adapter = adapter();
        let results = write(
            &adapter,
            vec![
                json!({"_id": "b"}),
                json!({"_id": "a"}),
                json!({"_id": "b"}),
                json!(42),
            ],
        );
        assert_eq!(results[0].as_ref().unwrap().id, "b");
        assert_eq!(results[1].as_ref().unwrap().id, "a");
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::RevConflict);
        assert_eq!(results[3].as_ref().unwrap_err().kind(), ErrorKind::BadRequest);
        assert_eq!(doc_count(&adapter), 2);
    }

    #[test]
    fn deleted_document_is_revived_from_winner() {
        let adapter = adapter();
        let rev1 = write(&adapter, vec![json!({"_id": "a"})])[0]
            .as_ref()
            .unwrap()
            .rev
            .clone();
        write(&adapter, vec![json!({"_id": "a", "_rev": rev1, "_deleted": true})]);
        assert_eq!(doc_count(&adapter), 0);

        let revived = write(&adapter, vec![json!({"_id": "a", "n": 3})]);
        assert!(revived[0].as_ref().unwrap().rev.starts_with("3-"));
        assert_eq!(doc_count(&adapter), 1);
    }

    #[test]
    fn replicated_branches_form_conflicts() {
        let adapter = adapter();
        let results = replicate(
            &adapter,
            vec![
                json!({"_id": "d", "_rev": "2-b", "_revisions": {"start": 2, "ids": ["b", "a"]}}),
                json!({"_id": "d", "_rev": "2-c", "_revisions": {"start": 2, "ids": ["c", "a"]}}),
            ],
        );
        assert!(results.iter().all(Result::is_ok));
        let meta = metadata(&adapter, "d");
        assert_eq!(meta.winning_rev, Revision::new(2, "c"));
        assert_eq!(meta.rev_tree.collect_conflicts(), vec![Revision::new(2, "b")]);
        assert!(!meta.rev_tree.is_available(&Revision::new(1, "a")));
        assert_eq!(doc_count(&adapter), 1);
    }

    #[test]
    fn replaying_a_known_revision_writes_nothing() {
        let adapter = adapter();
        let doc = json!({"_id": "d", "_rev": "1-a"});
        replicate(&adapter, vec![doc.clone()]);
        let outcome = adapter.bulk_docs(edits(vec![doc], false), false).unwrap();
        assert_eq!(outcome.results[0].as_ref().unwrap().rev, "1-a");
        assert_eq!(outcome.update_seq, None);
    }

    #[test]
    fn separator_lookalike_ids_keep_their_own_records() {
        let adapter = adapter();
        replicate(&adapter, vec![json!({"_id": "a", "_rev": "1-x::2-y", "v": "A"})]);
        let results = replicate(&adapter, vec![json!({"_id": "a::1-x", "_rev": "2-y", "v": "B"})]);
        assert!(results[0].is_ok());

        let a = metadata(&adapter, "a");
        let other = metadata(&adapter, "a::1-x");
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        let record = load_rev(&txn, &a, &a.winning_rev).unwrap().unwrap();
        assert_eq!(record.doc_id, "a");
        assert_eq!(record.body["v"], "A");
        let record = load_rev(&txn, &other, &other.winning_rev).unwrap().unwrap();
        assert_eq!(record.body["v"], "B");
        assert_eq!(txn.count(BY_SEQ, &KeyRange::all()).unwrap(), 2);
    }

    #[test]
    fn stemming_drops_sequence_records() {
        let adapter = adapter_with(Config::default().revs_limit(2));
        let mut rev: Option<String> = None;
        for n in 0..4 {
            let mut doc = json!({"_id": "s", "n": n});
            if let Some(r) = &rev {
                doc["_rev"] = json!(r);
            }
            rev = Some(write(&adapter, vec![doc])[0].as_ref().unwrap().rev.clone());
        }
        let meta = metadata(&adapter, "s");
        assert_eq!(meta.rev_tree.len(), 2);
        assert_eq!(meta.rev_map.len(), 2);
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        assert!(load_seq(&txn, 1).unwrap().is_none());
        assert_eq!(txn.count(DOC_REV_INDEX, &KeyRange::all()).unwrap(), 2);
    }

    #[test]
    fn attachments_are_stored_once_and_stubs_resolve() {
        let adapter = adapter();
        let data = sofadb_codec::encode_base64(b"hello");
        let first = write(
            &adapter,
            vec![
                json!({"_id": "a", "_attachments": {"f.txt": {"content_type": "text/plain", "data": data}}}),
                json!({"_id": "b", "_attachments": {"g.txt": {"content_type": "text/plain", "data": data}}}),
            ],
        );
        let rev = first[0].as_ref().unwrap().rev.clone();
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        assert_eq!(txn.count(ATTACH_STORE, &KeyRange::all()).unwrap(), 1);
        drop(txn);

        let updated = write(
            &adapter,
            vec![json!({"_id": "a", "_rev": rev, "_attachments": {"f.txt": {"stub": true}}})],
        );
        assert!(updated[0].is_ok());
        let meta = metadata(&adapter, "a");
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        let record = load_rev(&txn, &meta, &meta.winning_rev).unwrap().unwrap();
        assert_eq!(record.attachments["f.txt"].revpos, 1);
        assert_eq!(record.attachments["f.txt"].length, 5);
    }

    #[test]
    fn unknown_stub_fails_only_its_entry() {
        let adapter = adapter();
        let results = write(
            &adapter,
            vec![
                json!({"_id": "a", "_attachments": {"x": {"stub": true, "digest": "sha256-00"}}}),
                json!({"_id": "b"}),
            ],
        );
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::MissingStub);
        assert!(results[1].is_ok());
    }

    #[test]
    fn local_documents_bypass_revision_trees() {
        let adapter = adapter();
        let created = write(&adapter, vec![json!({"_id": "_local/cp", "seq": 1})]);
        assert_eq!(created[0].as_ref().unwrap().rev, "0-1");
        let updated = write(&adapter, vec![json!({"_id": "_local/cp", "_rev": "0-1", "seq": 2})]);
        assert_eq!(updated[0].as_ref().unwrap().rev, "0-2");
        let stale = write(&adapter, vec![json!({"_id": "_local/cp", "_rev": "0-1"})]);
        assert_eq!(stale[0].as_ref().unwrap_err().kind(), ErrorKind::RevConflict);
        let removed = write(
            &adapter,
            vec![json!({"_id": "_local/cp", "_rev": "0-2", "_deleted": true})],
        );
        assert!(removed[0].is_ok());
        assert_eq!(doc_count(&adapter), 0);
        let txn = adapter.read_txn(ALL_STORES).unwrap();
        assert_eq!(txn.last_auto_key(BY_SEQ).unwrap(), 0);
    }
}
