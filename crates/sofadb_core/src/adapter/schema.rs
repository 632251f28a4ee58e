//! Physical schema: collection names, key layouts and stored records.
//!
//! | Collection | Key | Value |
//! |---|---|---|
//! | `document-store` | doc id | [`DocMetadata`] |
//! | `by-sequence` | sequence, u64 big-endian | [`SeqRecord`] |
//! | `by-sequence-doc-rev` | id length (u32 big-endian), id, rev | sequence |
//! | `attach-store` | digest | attachment bytes |
//! | `attach-seq-store` | `digest::seq` | empty |
//! | `attach-seq-by-seq` | seq then digest | empty |
//! | `meta-store` | `meta` | [`MetaRecord`] |
//! | `local-store` | local id | [`LocalRecord`] |

use crate::error::{CoreError, CoreResult};
use crate::rev_tree::{RevNode, RevTree};
use crate::types::{Revision, Seq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sofadb_codec::{from_cbor, to_cbor};
use std::collections::BTreeMap;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 5;

/// Document metadata by id.
pub const DOC_STORE: &str = "document-store";
/// Sequence log.
pub const BY_SEQ: &str = "by-sequence";
/// Unique index of the sequence log by document id and revision.
pub const DOC_REV_INDEX: &str = "by-sequence-doc-rev";
/// Attachment bodies by digest.
pub const ATTACH_STORE: &str = "attach-store";
/// Attachment junction indexed by digest.
pub const ATTACH_SEQ_STORE: &str = "attach-seq-store";
/// Attachment junction indexed by sequence.
pub const ATTACH_SEQ_BY_SEQ: &str = "attach-seq-by-seq";
/// Database metadata singleton.
pub const META_STORE: &str = "meta-store";
/// Local documents.
pub const LOCAL_STORE: &str = "local-store";

/// Every collection of the current schema.
pub const ALL_STORES: &[&str] = &[
    DOC_STORE,
    BY_SEQ,
    DOC_REV_INDEX,
    ATTACH_STORE,
    ATTACH_SEQ_STORE,
    ATTACH_SEQ_BY_SEQ,
    META_STORE,
    LOCAL_STORE,
];

const META_KEY: &[u8] = b"meta";

pub(crate) fn meta_key() -> Vec<u8> {
    META_KEY.to_vec()
}

pub(crate) fn seq_key(seq: Seq) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

pub(crate) fn decode_seq(key: &[u8]) -> CoreResult<Seq> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| CoreError::Storage(sofadb_storage::StorageError::corrupted("bad sequence key")))?;
    Ok(Seq::from_be_bytes(bytes))
}

/// Index key for `(id, rev)`. The id is length-prefixed so no two pairs
/// share a key, whatever separators ids or hashes contain.
pub(crate) fn doc_rev_key(id: &str, rev: &Revision) -> Vec<u8> {
    let rev = rev.to_string();
    let mut key = Vec::with_capacity(4 + id.len() + rev.len());
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key.extend_from_slice(rev.as_bytes());
    key
}

pub(crate) fn attach_seq_key(digest: &str, seq: Seq) -> Vec<u8> {
    format!("{digest}::{seq:020}").into_bytes()
}

pub(crate) fn attach_seq_prefix(digest: &str) -> Vec<u8> {
    format!("{digest}::").into_bytes()
}

pub(crate) fn seq_attach_key(seq: Seq, digest: &str) -> Vec<u8> {
    let mut key = seq_key(seq);
    key.extend_from_slice(digest.as_bytes());
    key
}

/// Reference from a sequence record to a stored attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Content digest, key into `attach-store`.
    pub digest: String,
    /// MIME type.
    pub content_type: String,
    /// Body length in bytes.
    pub length: u64,
    /// Generation that first carried this body.
    pub revpos: u64,
}

/// One physical version of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqRecord {
    /// Document id.
    pub doc_id: String,
    /// Revision stored by this record.
    pub rev: Revision,
    /// Whether the revision is a deletion.
    pub deleted: bool,
    /// Body without reserved fields.
    pub body: Map<String, Value>,
    /// Attachments by name.
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentRef>,
}

impl SeqRecord {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredMetadata {
    id: String,
    rev_tree: Vec<RevNode>,
    winning_rev: Revision,
    deleted: bool,
    seq: Seq,
    rev_map: BTreeMap<Revision, Seq>,
}

/// Everything known about one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocMetadata {
    /// Document id.
    pub id: String,
    /// Revision history.
    pub rev_tree: RevTree,
    /// Current winner of `rev_tree`.
    pub winning_rev: Revision,
    /// Whether the winner is a deletion.
    pub deleted: bool,
    /// Highest sequence among this document's revisions.
    pub seq: Seq,
    /// Sequence of every revision whose body is stored.
    pub rev_map: BTreeMap<Revision, Seq>,
}

impl DocMetadata {
    /// Recomputes `winning_rev` and `deleted` from the tree.
    pub(crate) fn refresh_winner(&mut self) {
        if let Some(winner) = self.rev_tree.winning_rev() {
            self.deleted = self.rev_tree.is_deleted(&winner);
            self.winning_rev = winner;
        }
    }

    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let stored = StoredMetadata {
            id: self.id.clone(),
            rev_tree: self.rev_tree.nodes().to_vec(),
            winning_rev: self.winning_rev.clone(),
            deleted: self.deleted,
            seq: self.seq,
            rev_map: self.rev_map.clone(),
        };
        Ok(to_cbor(&stored)?)
    }

    /// Decodes stored metadata, validating its revision tree.
    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let stored: StoredMetadata = from_cbor(bytes)?;
        let rev_tree = RevTree::from_nodes(stored.rev_tree)?;
        if !rev_tree.is_leaf(&stored.winning_rev) {
            return Err(CoreError::invalid_rev_tree(format!(
                "winning revision {} of {} is not a leaf",
                stored.winning_rev, stored.id
            )));
        }
        Ok(Self {
            id: stored.id,
            rev_tree,
            winning_rev: stored.winning_rev,
            deleted: stored.deleted,
            seq: stored.seq,
            rev_map: stored.rev_map,
        })
    }
}

/// Whole-database bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    /// Number of documents whose winner is not deleted.
    pub doc_count: u64,
    /// Random id assigned when the database was created.
    pub instance_id: String,
    /// Number of purges applied.
    #[serde(default)]
    pub purge_seq: u64,
}

impl MetaRecord {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

/// A stored local document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Local document id including the `_local/` prefix.
    pub id: String,
    /// Revision `0-N`.
    pub rev: String,
    /// Body without reserved fields.
    pub body: Map<String, Value>,
}

impl LocalRecord {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rev_tree::RevStatus;

    #[test]
    fn sequence_keys_sort_numerically() {
        assert!(seq_key(2) < seq_key(10));
        assert_eq!(decode_seq(&seq_key(300)).unwrap(), 300);
        assert!(decode_seq(b"short").is_err());
    }

    #[test]
    fn attachment_junction_keys() {
        assert!(attach_seq_key("sha256-a", 9) < attach_seq_key("sha256-a", 10));
        assert!(attach_seq_key("sha256-a", 9).starts_with(&attach_seq_prefix("sha256-a")));
        assert!(seq_attach_key(3, "d").starts_with(&seq_key(3)));
    }

    #[test]
    fn doc_rev_keys_are_unambiguous() {
        let left = doc_rev_key("a::1-x", &Revision::new(2, "y"));
        let right = doc_rev_key("a", &Revision::parse("1-x::2-y").unwrap());
        assert_ne!(left, right);
        assert!(doc_rev_key("a", &Revision::new(1, "x")).starts_with(&[0, 0, 0, 1, b'a']));
    }

    #[test]
    fn metadata_rejects_non_leaf_winner() {
        let mut tree = RevTree::new();
        tree.merge(
            &[Revision::new(1, "a"), Revision::new(2, "b")],
            false,
            0,
        )
        .unwrap();
        let meta = DocMetadata {
            id: "d".into(),
            rev_tree: tree,
            winning_rev: Revision::new(1, "a"),
            deleted: false,
            seq: 1,
            rev_map: BTreeMap::new(),
        };
        let bytes = meta.encode().unwrap();
        assert!(matches!(
            DocMetadata::decode(&bytes),
            Err(CoreError::InvalidRevTree { .. })
        ));
    }

    #[test]
    fn metadata_with_corrupt_tree_is_invalid() {
        let stored = StoredMetadata {
            id: "d".into(),
            rev_tree: vec![RevNode {
                pos: 2,
                hash: "b".into(),
                parent: Some(4),
                status: RevStatus::Available,
                deleted: false,
            }],
            winning_rev: Revision::new(2, "b"),
            deleted: false,
            seq: 1,
            rev_map: BTreeMap::new(),
        };
        let bytes = to_cbor(&stored).unwrap();
        assert!(matches!(
            DocMetadata::decode(&bytes),
            Err(CoreError::InvalidRevTree { .. })
        ));
    }
}
