//! Sequence log scans for the change feed.

use super::cursor::run_batched_cursor;
use super::docs::{build_doc, DocView};
use super::schema::{
    decode_seq, seq_key, DocMetadata, SeqRecord, ATTACH_STORE, BY_SEQ, DOC_STORE,
};
use super::{load_metadata, load_rev, Adapter};
use crate::changes::{Change, ChangeRev, ChangesOptions, ChangesResponse, ChangesStyle};
use crate::error::CoreResult;
use serde_json::Value;
use sofadb_storage::{KeyRange, KvTransaction};
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::trace;

impl Adapter {
    /// Scans the sequence log once.
    ///
    /// A row is reported only if it holds its document's newest sequence,
    /// so each document appears at most once. With `descending`, rows after
    /// `since` are walked newest first.
    pub(crate) fn changes(&self, opts: &ChangesOptions) -> CoreResult<ChangesResponse> {
        let txn = self.read_txn(&[DOC_STORE, BY_SEQ, ATTACH_STORE])?;
        let limit = opts.limit.unwrap_or(usize::MAX);
        let doc_ids: Option<HashSet<&str>> = opts
            .doc_ids
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());
        let view = DocView::conflicts_and_attachments(opts.conflicts, opts.attachments);

        let mut results = Vec::new();
        let mut emitted = 0;
        let mut last_seq = opts.since;
        if limit == 0 {
            return Ok(ChangesResponse { results, last_seq });
        }

        let range = KeyRange::lower_bound(seq_key(opts.since), true);
        run_batched_cursor(
            &txn,
            BY_SEQ,
            &range,
            opts.descending,
            self.config.changes_batch_size,
            self.batch_fetch(),
            |keys, values, _| {
                for (key, bytes) in keys.iter().zip(values) {
                    let seq = decode_seq(key)?;
                    last_seq = seq;
                    let record = SeqRecord::decode(&bytes)?;
                    if doc_ids
                        .as_ref()
                        .is_some_and(|ids| !ids.contains(record.doc_id.as_str()))
                    {
                        continue;
                    }
                    let Some(meta) = load_metadata(&txn, &record.doc_id)? else {
                        continue;
                    };
                    if meta.seq != seq {
                        continue;
                    }
                    let Some(change) = change_for(&txn, &meta, record, seq, opts, view)? else {
                        continue;
                    };
                    emitted += 1;
                    if opts.return_docs {
                        results.push(change);
                    }
                    if emitted >= limit {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            },
        )?;
        trace!(db = self.name(), since = opts.since, last_seq, emitted, "scanned changes");
        Ok(ChangesResponse { results, last_seq })
    }
}

/// Builds the change for `meta`, or `None` if the filter rejects it.
fn change_for(
    txn: &KvTransaction,
    meta: &DocMetadata,
    record: SeqRecord,
    seq: u64,
    opts: &ChangesOptions,
    view: DocView,
) -> CoreResult<Option<Change>> {
    let doc = if opts.include_docs || opts.filter.is_some() {
        let winner = if record.rev == meta.winning_rev {
            Some(record)
        } else {
            load_rev(txn, meta, &meta.winning_rev)?
        };
        winner
            .map(|record| build_doc(txn, meta, &record, view))
            .transpose()?
    } else {
        None
    };
    if let Some(filter) = &opts.filter {
        if !filter(doc.as_ref().unwrap_or(&Value::Null)) {
            return Ok(None);
        }
    }

    let changes = match opts.style {
        ChangesStyle::MainOnly => vec![ChangeRev {
            rev: meta.winning_rev.to_string(),
        }],
        ChangesStyle::AllDocs => meta
            .rev_tree
            .collect_leaves()
            .into_iter()
            .map(|leaf| ChangeRev {
                rev: leaf.rev.to_string(),
            })
            .collect(),
    };
    Ok(Some(Change {
        id: meta.id.clone(),
        seq,
        changes,
        deleted: meta.deleted,
        doc: doc.filter(|_| opts.include_docs),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{adapter, adapter_with};
    use super::*;
    use crate::config::Config;
    use crate::document::parse_edit;
    use serde_json::json;

    fn write(adapter: &Adapter, docs: Vec<Value>) -> Vec<String> {
        let edits = docs
            .into_iter()
            .map(|d| parse_edit(d, true, String::new))
            .collect();
        adapter
            .bulk_docs(edits, true)
            .unwrap()
            .results
            .into_iter()
            .map(|r| r.unwrap().rev)
            .collect()
    }

    fn ids(response: &ChangesResponse) -> Vec<(&str, u64)> {
        response
            .results
            .iter()
            .map(|c| (c.id.as_str(), c.seq))
            .collect()
    }

    fn sample(adapter: &Adapter) {
        let revs = write(
            adapter,
            vec![json!({"_id": "a"}), json!({"_id": "b", "kind": "x"}), json!({"_id": "c"})],
        );
        write(adapter, vec![json!({"_id": "a", "_rev": revs[0], "n": 2})]);
    }

    #[test]
    fn each_document_appears_once_at_its_latest_sequence() {
        let adapter = adapter_with(Config::default().changes_batch_size(2));
        sample(&adapter);
        let response = adapter.changes(&ChangesOptions::default()).unwrap();
        assert_eq!(ids(&response), [("b", 2), ("c", 3), ("a", 4)]);
        assert_eq!(response.last_seq, 4);

        let after = adapter.changes(&ChangesOptions::since(3)).unwrap();
        assert_eq!(ids(&after), [("a", 4)]);
        let none = adapter.changes(&ChangesOptions::since(4)).unwrap();
        assert!(none.results.is_empty());
        assert_eq!(none.last_seq, 4);
    }

    #[test]
    fn descending_limit_and_doc_ids() {
        let adapter = adapter();
        sample(&adapter);
        let opts = ChangesOptions {
            descending: true,
            limit: Some(2),
            ..ChangesOptions::default()
        };
        let response = adapter.changes(&opts).unwrap();
        assert_eq!(ids(&response), [("a", 4), ("c", 3)]);
        assert_eq!(response.last_seq, 3);

        let opts = ChangesOptions {
            doc_ids: Some(vec!["c".into()]),
            ..ChangesOptions::default()
        };
        assert_eq!(ids(&adapter.changes(&opts).unwrap()), [("c", 3)]);
    }

    #[test]
    fn filter_sees_documents_and_include_docs_returns_them() {
        let adapter = adapter();
        sample(&adapter);
        let opts = ChangesOptions::default().filter(|doc| doc["kind"] == "x");
        let response = adapter.changes(&opts).unwrap();
        assert_eq!(ids(&response), [("b", 2)]);
        assert!(response.results[0].doc.is_none());

        let opts = ChangesOptions {
            include_docs: true,
            ..ChangesOptions::since(3)
        };
        let response = adapter.changes(&opts).unwrap();
        assert_eq!(response.results[0].doc.as_ref().unwrap()["n"], 2);
    }

    #[test]
    fn all_docs_style_lists_every_leaf() {
        let adapter = adapter();
        let edits = [
            json!({"_id": "d", "_rev": "1-a"}),
            json!({"_id": "d", "_rev": "1-b"}),
        ]
        .into_iter()
        .map(|d| parse_edit(d, false, String::new))
        .collect();
        adapter.bulk_docs(edits, false).unwrap();
        let opts = ChangesOptions {
            style: ChangesStyle::AllDocs,
            ..ChangesOptions::default()
        };
        let response = adapter.changes(&opts).unwrap();
        assert_eq!(response.results.len(), 1);
        let revs: Vec<&str> = response.results[0]
            .changes
            .iter()
            .map(|c| c.rev.as_str())
            .collect();
        assert_eq!(revs, ["1-b", "1-a"]);
    }

    #[test]
    fn without_return_docs_only_last_seq_is_reported() {
        let adapter = adapter();
        sample(&adapter);
        let opts = ChangesOptions {
            return_docs: false,
            ..ChangesOptions::default()
        };
        let response = adapter.changes(&opts).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.last_seq, 4);
    }
}
