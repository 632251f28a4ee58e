//! Document reads, range listing, revision diffs and database info.

use super::cursor::run_batched_cursor;
use super::docs::{build_doc, DocView};
use super::schema::{
    DocMetadata, LocalRecord, ATTACH_STORE, BY_SEQ, DOC_STORE, LOCAL_STORE, META_STORE,
};
use super::{load_meta, load_metadata, load_rev, require_metadata, Adapter};
use crate::error::{CoreError, CoreResult};
use crate::options::{
    AllDocsOptions, AllDocsResponse, AllDocsRow, Attachment, DbInfo, GetOptions, OpenRevResult,
    OpenRevs, RevsDiffEntry, RowValue,
};
use crate::types::{is_local_id, Revision};
use serde_json::Value;
use sofadb_storage::{KeyRange, KvTransaction};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

const DOC_READ: &[&str] = &[DOC_STORE, BY_SEQ, ATTACH_STORE];

impl Adapter {
    /// Reads a document.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the document, the requested revision or its
    /// body is unknown, with reason `deleted` when the winner is a deletion
    /// and no revision was requested.
    pub(crate) fn get(&self, id: &str, opts: &GetOptions) -> CoreResult<Value> {
        if is_local_id(id) {
            return self.get_local(id);
        }
        let txn = self.read_txn(DOC_READ)?;
        let meta = require_metadata(load_metadata(&txn, id)?, id)?;
        let rev = match &opts.rev {
            Some(rev) if !meta.rev_tree.contains(rev) => return Err(CoreError::missing(id)),
            Some(rev) if opts.latest => meta.rev_tree.latest(rev).unwrap_or_else(|| rev.clone()),
            Some(rev) => rev.clone(),
            None if meta.deleted => return Err(CoreError::deleted(id)),
            None => meta.winning_rev.clone(),
        };
        let record = load_rev(&txn, &meta, &rev)?.ok_or_else(|| CoreError::missing(id))?;
        build_doc(&txn, &meta, &record, DocView::from(opts))
    }

    /// Reads several revisions of one document.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` for [`OpenRevs::All`] on an unknown document.
    pub(crate) fn get_open_revs(
        &self,
        id: &str,
        revs: &OpenRevs,
        opts: &GetOptions,
    ) -> CoreResult<Vec<OpenRevResult>> {
        let txn = self.read_txn(DOC_READ)?;
        let meta = load_metadata(&txn, id)?;
        let wanted: Vec<Revision> = match (revs, meta.as_ref()) {
            (OpenRevs::All, Some(meta)) => meta
                .rev_tree
                .collect_leaves()
                .into_iter()
                .map(|leaf| leaf.rev)
                .collect(),
            (OpenRevs::All, None) => return Err(CoreError::missing(id)),
            (OpenRevs::Revs(list), _) => list.clone(),
        };

        let view = DocView::from(opts);
        let mut out = Vec::with_capacity(wanted.len());
        for requested in wanted {
            let Some(meta) = meta.as_ref().filter(|m| m.rev_tree.contains(&requested)) else {
                out.push(OpenRevResult::Missing(requested));
                continue;
            };
            let rev = if opts.latest {
                meta.rev_tree
                    .latest(&requested)
                    .unwrap_or_else(|| requested.clone())
            } else {
                requested.clone()
            };
            match load_rev(&txn, meta, &rev)? {
                Some(record) => out.push(OpenRevResult::Ok(build_doc(&txn, meta, &record, view)?)),
                None => out.push(OpenRevResult::Missing(requested)),
            }
        }
        Ok(out)
    }

    /// Lists documents by id.
    ///
    /// # Errors
    ///
    /// Returns `bad_request` if `keys` is combined with a key range.
    pub(crate) fn all_docs(&self, opts: &AllDocsOptions) -> CoreResult<AllDocsResponse> {
        if opts.keys.is_some()
            && (opts.key.is_some() || opts.start_key.is_some() || opts.end_key.is_some())
        {
            return Err(CoreError::bad_request(
                "`keys` cannot be combined with `key`, `start_key` or `end_key`",
            ));
        }
        let txn = self.read_txn(&[DOC_STORE, BY_SEQ, ATTACH_STORE, META_STORE])?;
        let total_rows = load_meta(&txn)?.doc_count;
        let update_seq = if opts.update_seq {
            Some(txn.last_auto_key(BY_SEQ)?)
        } else {
            None
        };
        let view = DocView::conflicts_and_attachments(opts.conflicts, opts.attachments);
        let limit = opts.limit.unwrap_or(usize::MAX);

        let rows = match &opts.keys {
            Some(keys) => {
                let mut rows = Vec::new();
                for key in keys.iter().skip(opts.skip).take(limit) {
                    rows.push(self.keyed_row(&txn, key, opts.include_docs, view)?);
                }
                rows
            }
            None => self.range_rows(&txn, opts, view, limit)?,
        };

        Ok(AllDocsResponse {
            total_rows,
            offset: opts.skip,
            rows,
            update_seq,
        })
    }

    fn keyed_row(
        &self,
        txn: &KvTransaction,
        key: &str,
        include_docs: bool,
        view: DocView,
    ) -> CoreResult<AllDocsRow> {
        let mut row = AllDocsRow {
            id: key.to_string(),
            key: key.to_string(),
            value: None,
            doc: None,
            error: None,
        };
        match load_metadata(txn, key)? {
            None => row.error = Some("not_found".to_string()),
            Some(meta) if meta.deleted => {
                row.value = Some(RowValue {
                    rev: meta.winning_rev.to_string(),
                    deleted: true,
                });
            }
            Some(meta) => {
                if include_docs {
                    row.doc = winner_doc(txn, &meta, view)?;
                }
                row.value = Some(RowValue {
                    rev: meta.winning_rev.to_string(),
                    deleted: false,
                });
            }
        }
        Ok(row)
    }

    fn range_rows(
        &self,
        txn: &KvTransaction,
        opts: &AllDocsOptions,
        view: DocView,
        limit: usize,
    ) -> CoreResult<Vec<AllDocsRow>> {
        let range = id_range(opts);
        let mut rows = Vec::new();
        if limit == 0 || range.is_empty() {
            return Ok(rows);
        }
        let mut skip = opts.skip;
        run_batched_cursor(
            txn,
            DOC_STORE,
            &range,
            opts.descending,
            self.config.cursor_batch_size,
            self.batch_fetch(),
            |_, values, _| {
                for bytes in values {
                    let meta = DocMetadata::decode(&bytes)?;
                    if meta.deleted {
                        continue;
                    }
                    if skip > 0 {
                        skip -= 1;
                        continue;
                    }
                    let doc = if opts.include_docs {
                        winner_doc(txn, &meta, view)?
                    } else {
                        None
                    };
                    rows.push(AllDocsRow {
                        id: meta.id.clone(),
                        key: meta.id,
                        value: Some(RowValue {
                            rev: meta.winning_rev.to_string(),
                            deleted: false,
                        }),
                        doc,
                        error: None,
                    });
                    if rows.len() >= limit {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            },
        )?;
        Ok(rows)
    }

    /// Reports which of the given revisions are unknown.
    ///
    /// Documents with nothing missing are left out of the answer.
    pub(crate) fn revs_diff(
        &self,
        request: &BTreeMap<String, Vec<Revision>>,
    ) -> CoreResult<BTreeMap<String, RevsDiffEntry>> {
        let txn = self.read_txn(&[DOC_STORE])?;
        let mut answer = BTreeMap::new();
        for (id, revs) in request {
            let meta = load_metadata(&txn, id)?;
            let missing: BTreeSet<Revision> = revs
                .iter()
                .filter(|r| !meta.as_ref().is_some_and(|m| m.rev_tree.contains(r)))
                .cloned()
                .collect();
            if missing.is_empty() {
                continue;
            }
            let mut ancestors = BTreeSet::new();
            if let Some(meta) = &meta {
                for leaf in meta.rev_tree.collect_leaves() {
                    if missing.iter().any(|m| leaf.rev.pos < m.pos) {
                        ancestors.insert(leaf.rev);
                    }
                }
            }
            answer.insert(
                id.clone(),
                RevsDiffEntry {
                    missing: missing.into_iter().collect(),
                    possible_ancestors: ancestors.into_iter().collect(),
                },
            );
        }
        Ok(answer)
    }

    /// Summarizes the database.
    pub(crate) fn info(&self) -> CoreResult<DbInfo> {
        let txn = self.read_txn(&[BY_SEQ, META_STORE])?;
        let meta = load_meta(&txn)?;
        Ok(DbInfo {
            db_name: self.name().to_string(),
            doc_count: meta.doc_count,
            update_seq: txn.last_auto_key(BY_SEQ)?,
            purge_seq: meta.purge_seq,
            instance_id: meta.instance_id,
            adapter: self.kind().to_string(),
        })
    }

    /// Reads one attachment of a revision, the winner by default.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the document, revision or attachment is
    /// unknown.
    pub(crate) fn get_attachment(
        &self,
        id: &str,
        name: &str,
        rev: Option<&Revision>,
    ) -> CoreResult<Attachment> {
        let txn = self.read_txn(DOC_READ)?;
        let meta = require_metadata(load_metadata(&txn, id)?, id)?;
        let rev = match rev {
            Some(rev) => rev.clone(),
            None if meta.deleted => return Err(CoreError::deleted(id)),
            None => meta.winning_rev.clone(),
        };
        let missing = || CoreError::missing(format!("{id}/{name}"));
        let record = load_rev(&txn, &meta, &rev)?.ok_or_else(missing)?;
        let reference = record.attachments.get(name).ok_or_else(missing)?;
        let data = txn
            .get(ATTACH_STORE, reference.digest.as_bytes())?
            .ok_or_else(missing)?;
        Ok(Attachment {
            content_type: reference.content_type.clone(),
            digest: reference.digest.clone(),
            data,
        })
    }

    /// Reads a local document.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if it does not exist.
    pub(crate) fn get_local(&self, id: &str) -> CoreResult<Value> {
        let txn = self.read_txn(&[LOCAL_STORE])?;
        let bytes = txn
            .get(LOCAL_STORE, id.as_bytes())?
            .ok_or_else(|| CoreError::missing(id))?;
        let record = LocalRecord::decode(&bytes)?;
        let mut doc = record.body;
        doc.insert("_id".into(), Value::String(record.id));
        doc.insert("_rev".into(), Value::String(record.rev));
        Ok(Value::Object(doc))
    }
}

fn winner_doc(txn: &KvTransaction, meta: &DocMetadata, view: DocView) -> CoreResult<Option<Value>> {
    load_rev(txn, meta, &meta.winning_rev)?
        .map(|record| build_doc(txn, meta, &record, view))
        .transpose()
}

/// Key range of an all-docs request. In descending order `start_key` is
/// the upper bound.
fn id_range(opts: &AllDocsOptions) -> KeyRange {
    if let Some(key) = &opts.key {
        return KeyRange::only(key.as_bytes().to_vec());
    }
    let (lower, upper) = if opts.descending {
        (&opts.end_key, &opts.start_key)
    } else {
        (&opts.start_key, &opts.end_key)
    };
    let end_open = !opts.inclusive_end;
    let mut range = KeyRange::all();
    if let Some(lower) = lower {
        let open = opts.descending && end_open;
        range = range.with_lower(lower.as_bytes().to_vec(), open);
    }
    if let Some(upper) = upper {
        let open = !opts.descending && end_open;
        range = range.with_upper(upper.as_bytes().to_vec(), open);
    }
    range
}
