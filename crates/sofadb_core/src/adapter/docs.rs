//! Assembling JSON documents from stored records.

use super::schema::{DocMetadata, SeqRecord, ATTACH_STORE};
use crate::error::{CoreError, CoreResult};
use crate::options::GetOptions;
use serde_json::{json, Map, Value};
use sofadb_codec::encode_base64;
use sofadb_storage::KvTransaction;

/// Which optional fields a document read includes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DocView {
    pub revs: bool,
    pub revs_info: bool,
    pub conflicts: bool,
    pub attachments: bool,
}

impl DocView {
    pub(crate) fn conflicts_and_attachments(conflicts: bool, attachments: bool) -> Self {
        Self {
            conflicts,
            attachments,
            ..Self::default()
        }
    }
}

impl From<&GetOptions> for DocView {
    fn from(opts: &GetOptions) -> Self {
        Self {
            revs: opts.revs,
            revs_info: opts.revs_info,
            conflicts: opts.conflicts,
            attachments: opts.attachments,
        }
    }
}

/// Builds the JSON form of `record`.
pub(crate) fn build_doc(
    txn: &KvTransaction,
    meta: &DocMetadata,
    record: &SeqRecord,
    view: DocView,
) -> CoreResult<Value> {
    let mut doc = Map::new();
    doc.insert("_id".into(), Value::String(meta.id.clone()));
    doc.insert("_rev".into(), Value::String(record.rev.to_string()));
    if record.deleted {
        doc.insert("_deleted".into(), Value::Bool(true));
    }
    for (key, value) in &record.body {
        doc.insert(key.clone(), value.clone());
    }

    if !record.attachments.is_empty() {
        let mut attachments = Map::new();
        for (name, att) in &record.attachments {
            let mut entry = json!({
                "content_type": att.content_type,
                "digest": att.digest,
                "revpos": att.revpos,
            });
            if view.attachments {
                let data = txn
                    .get(ATTACH_STORE, att.digest.as_bytes())?
                    .ok_or_else(|| CoreError::missing(format!("{}/{name}", meta.id)))?;
                entry["data"] = Value::String(encode_base64(&data));
            } else {
                entry["length"] = json!(att.length);
                entry["stub"] = Value::Bool(true);
            }
            attachments.insert(name.clone(), entry);
        }
        doc.insert("_attachments".into(), Value::Object(attachments));
    }

    if view.conflicts {
        let conflicts = meta.rev_tree.collect_conflicts();
        if !conflicts.is_empty() {
            let revs = conflicts.iter().map(|r| Value::String(r.to_string()));
            doc.insert("_conflicts".into(), Value::Array(revs.collect()));
        }
    }

    if view.revs || view.revs_info {
        let path = meta.rev_tree.rev_path(&record.rev).unwrap_or_default();
        if view.revs {
            let ids: Vec<Value> = path.iter().map(|r| Value::String(r.hash.clone())).collect();
            doc.insert(
                "_revisions".into(),
                json!({"start": record.rev.pos, "ids": ids}),
            );
        }
        if view.revs_info {
            let info: Vec<Value> = path
                .iter()
                .map(|rev| {
                    let status = if meta.rev_tree.is_deleted(rev) {
                        "deleted"
                    } else if meta.rev_map.contains_key(rev) {
                        "available"
                    } else {
                        "missing"
                    };
                    json!({"rev": rev.to_string(), "status": status})
                })
                .collect();
            doc.insert("_revs_info".into(), Value::Array(info));
        }
    }

    Ok(Value::Object(doc))
}
