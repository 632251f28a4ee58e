//! Request options and response types of the document API.

use crate::types::{Revision, Seq};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for [`Database::get`](crate::Database::get).
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Read this revision instead of the winner.
    pub rev: Option<Revision>,
    /// Include `_revisions` (the revision's ancestry).
    pub revs: bool,
    /// Include `_revs_info` (ancestry with availability).
    pub revs_info: bool,
    /// Include `_conflicts`.
    pub conflicts: bool,
    /// Inline attachment bodies instead of stubs.
    pub attachments: bool,
    /// With `rev`, read the best leaf descending from it.
    pub latest: bool,
}

impl GetOptions {
    /// Reads a specific revision.
    #[must_use]
    pub fn rev(rev: Revision) -> Self {
        Self {
            rev: Some(rev),
            ..Self::default()
        }
    }
}

/// Which revisions [`Database::get_open_revs`](crate::Database::get_open_revs) returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRevs {
    /// Every leaf.
    All,
    /// The listed revisions.
    Revs(Vec<Revision>),
}

/// One entry of an open-revs response.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenRevResult {
    /// The revision's document.
    Ok(Value),
    /// The revision is unknown or its body is gone.
    Missing(Revision),
}

/// Options for [`Database::bulk_docs`](crate::Database::bulk_docs).
#[derive(Debug, Clone, Copy)]
pub struct BulkDocsOptions {
    /// `false` stores supplied revisions as-is (replication).
    pub new_edits: bool,
}

impl Default for BulkDocsOptions {
    fn default() -> Self {
        Self { new_edits: true }
    }
}

impl BulkDocsOptions {
    /// Options for replicated writes.
    #[must_use]
    pub const fn replicated() -> Self {
        Self { new_edits: false }
    }
}

/// Successful outcome of one document write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Document id.
    pub id: String,
    /// Revision written.
    pub rev: String,
}

/// Options for [`Database::all_docs`](crate::Database::all_docs).
#[derive(Debug, Clone)]
pub struct AllDocsOptions {
    /// First id of the range.
    pub start_key: Option<String>,
    /// Last id of the range.
    pub end_key: Option<String>,
    /// Whether `end_key` itself is included.
    pub inclusive_end: bool,
    /// Only this id.
    pub key: Option<String>,
    /// Exactly these ids, in this order.
    pub keys: Option<Vec<String>>,
    /// Rows to skip.
    pub skip: usize,
    /// Maximum rows returned.
    pub limit: Option<usize>,
    /// Walk ids in reverse order.
    pub descending: bool,
    /// Include winning documents.
    pub include_docs: bool,
    /// Include `_conflicts` in documents.
    pub conflicts: bool,
    /// Inline attachment bodies in documents.
    pub attachments: bool,
    /// Report the current update sequence.
    pub update_seq: bool,
}

impl Default for AllDocsOptions {
    fn default() -> Self {
        Self {
            start_key: None,
            end_key: None,
            inclusive_end: true,
            key: None,
            keys: None,
            skip: 0,
            limit: None,
            descending: false,
            include_docs: false,
            conflicts: false,
            attachments: false,
            update_seq: false,
        }
    }
}

/// Value of an all-docs row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    /// Winning revision.
    pub rev: String,
    /// Set for deleted documents requested by key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// One row of an all-docs response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsRow {
    /// Document id (equals `key`).
    pub id: String,
    /// Row key.
    pub key: String,
    /// Winning revision; absent for unknown keys.
    pub value: Option<RowValue>,
    /// Winning document when `include_docs` was set.
    pub doc: Option<Value>,
    /// `not_found` for unknown keys.
    pub error: Option<String>,
}

/// Response of [`Database::all_docs`](crate::Database::all_docs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsResponse {
    /// Live document count.
    pub total_rows: u64,
    /// Rows skipped before the first returned row.
    pub offset: usize,
    /// Result rows.
    pub rows: Vec<AllDocsRow>,
    /// Update sequence when requested.
    pub update_seq: Option<Seq>,
}

/// Per-document answer of [`Database::revs_diff`](crate::Database::revs_diff).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevsDiffEntry {
    /// Requested revisions this database does not have.
    pub missing: Vec<Revision>,
    /// Known leaves that may be ancestors of missing revisions.
    pub possible_ancestors: Vec<Revision>,
}

/// Options for [`Database::compact`](crate::Database::compact).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactOptions {
    /// Overrides the configured retention depth.
    pub retention: Option<u64>,
}

/// Summary of a compaction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Documents examined.
    pub docs_scanned: usize,
    /// Revision bodies removed.
    pub revs_compacted: usize,
    /// Attachment bodies removed.
    pub attachments_removed: usize,
}

/// Outcome of [`Database::purge`](crate::Database::purge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeResult {
    /// Revisions removed from the tree.
    pub purged: Vec<Revision>,
    /// Purge sequence after this purge.
    pub purge_seq: u64,
}

/// Database summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    /// Database name.
    pub db_name: String,
    /// Live document count.
    pub doc_count: u64,
    /// Latest sequence.
    pub update_seq: Seq,
    /// Number of purges.
    pub purge_seq: u64,
    /// Random id assigned at creation.
    pub instance_id: String,
    /// Name of the backend serving the database.
    pub adapter: String,
}

/// An attachment body with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME type.
    pub content_type: String,
    /// Content digest.
    pub digest: String,
    /// Body.
    pub data: Vec<u8>,
}
