//! Parsing and validation of incoming documents.
//!
//! Incoming documents are JSON objects. Fields starting with `_` are
//! reserved; the ones understood here are split off and the rest of the
//! object becomes the stored body.

use crate::error::{CoreError, CoreResult};
use crate::types::{is_local_id, Revision, DESIGN_PREFIX, LOCAL_PREFIX};
use serde_json::{Map, Value};
use sofadb_codec::decode_base64;
use std::collections::BTreeMap;

/// Reserved fields accepted on input.
const RESERVED_FIELDS: &[&str] = &["_id", "_rev", "_deleted", "_attachments", "_revisions"];

/// Read-only fields that callers may echo back from a previous read.
const IGNORED_FIELDS: &[&str] = &["_conflicts", "_revs_info", "_deleted_conflicts"];

/// An attachment as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttachmentInput {
    /// Reference to an attachment stored with an earlier revision.
    Stub {
        digest: Option<String>,
    },
    /// New attachment content.
    Inline {
        content_type: String,
        data: Vec<u8>,
    },
}

/// A validated document edit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedDoc {
    pub id: String,
    pub rev: Option<Revision>,
    /// Ancestry from `_revisions`, newest first, starting with `rev`.
    pub revisions: Option<Vec<Revision>>,
    pub deleted: bool,
    pub body: Map<String, Value>,
    pub attachments: BTreeMap<String, AttachmentInput>,
}

/// A validated local document edit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocalEdit {
    pub id: String,
    pub rev: Option<String>,
    pub deleted: bool,
    pub body: Map<String, Value>,
}

/// One entry of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Edit {
    Versioned(ParsedDoc),
    Local(LocalEdit),
}

impl Edit {
    pub(crate) fn id(&self) -> &str {
        match self {
            Self::Versioned(doc) => &doc.id,
            Self::Local(doc) => &doc.id,
        }
    }
}

/// Validates a document id.
pub(crate) fn validate_id(id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::invalid_id(id, "document id must not be empty"));
    }
    if let Some(rest) = id.strip_prefix('_') {
        let named = [DESIGN_PREFIX, LOCAL_PREFIX]
            .iter()
            .any(|p| id.starts_with(p) && id.len() > p.len());
        if !named {
            return Err(CoreError::invalid_id(
                id,
                format!("only _design/ and _local/ ids may start with '_', got _{rest}"),
            ));
        }
    }
    Ok(())
}

/// Parses one bulk entry.
///
/// `generated_id` supplies an id when the entry has none; `new_edits`
/// selects replication rules, which require both `_id` and `_rev`.
pub(crate) fn parse_edit(
    value: Value,
    new_edits: bool,
    generated_id: impl FnOnce() -> String,
) -> CoreResult<Edit> {
    let Value::Object(mut doc) = value else {
        return Err(CoreError::bad_request("bulk entries must be JSON objects"));
    };

    let id = match doc.remove("_id") {
        Some(Value::String(id)) => id,
        Some(other) => {
            return Err(CoreError::invalid_id(
                other.to_string(),
                "document id must be a string",
            ))
        }
        None if new_edits => generated_id(),
        None => return Err(CoreError::invalid_id("", "replicated documents need an _id")),
    };
    validate_id(&id)?;

    let rev = match doc.remove("_rev") {
        Some(Value::String(rev)) => Some(rev),
        Some(Value::Null) | None => None,
        Some(other) => return Err(CoreError::invalid_rev(other.to_string())),
    };
    let deleted = match doc.remove("_deleted") {
        Some(Value::Bool(b)) => b,
        Some(Value::Null) | None => false,
        Some(_) => return Err(CoreError::bad_request("_deleted must be a boolean")),
    };

    if is_local_id(&id) {
        strip_reserved(&mut doc)?;
        return Ok(Edit::Local(LocalEdit {
            id,
            rev,
            deleted,
            body: doc,
        }));
    }

    let rev = rev.as_deref().map(Revision::parse).transpose()?;
    if !new_edits && rev.is_none() {
        return Err(CoreError::bad_request(format!(
            "replicated document {id} needs a _rev"
        )));
    }

    let revisions = match doc.remove("_revisions") {
        Some(value) => Some(parse_revisions(&value, rev.as_ref())?),
        None => None,
    };
    let attachments = match doc.remove("_attachments") {
        Some(value) => parse_attachments(value)?,
        None => BTreeMap::new(),
    };
    strip_reserved(&mut doc)?;

    Ok(Edit::Versioned(ParsedDoc {
        id,
        rev,
        revisions,
        deleted,
        body: doc,
        attachments,
    }))
}

fn strip_reserved(doc: &mut Map<String, Value>) -> CoreResult<()> {
    for field in IGNORED_FIELDS {
        doc.remove(*field);
    }
    if let Some(field) = doc.keys().find(|k| k.starts_with('_')) {
        let message = if RESERVED_FIELDS.contains(&field.as_str()) {
            format!("field {field} is not allowed here")
        } else {
            format!("bad special document member: {field}")
        };
        return Err(CoreError::bad_request(message));
    }
    Ok(())
}

/// Parses `{"start": N, "ids": [...]}` into revisions, newest first.
fn parse_revisions(value: &Value, rev: Option<&Revision>) -> CoreResult<Vec<Revision>> {
    let start = value
        .get("start")
        .and_then(Value::as_u64)
        .ok_or_else(|| CoreError::bad_request("_revisions.start must be a positive integer"))?;
    let ids = value
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::bad_request("_revisions.ids must be an array"))?;
    if ids.is_empty() || ids.len() as u64 > start {
        return Err(CoreError::bad_request(
            "_revisions.ids does not fit _revisions.start",
        ));
    }

    let mut revs = Vec::with_capacity(ids.len());
    for (offset, id) in ids.iter().enumerate() {
        let hash = id
            .as_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CoreError::bad_request("_revisions.ids must be strings"))?;
        revs.push(Revision::new(start - offset as u64, hash));
    }
    if rev.is_some_and(|r| *r != revs[0]) {
        return Err(CoreError::bad_request("_rev does not match _revisions"));
    }
    Ok(revs)
}

fn parse_attachments(value: Value) -> CoreResult<BTreeMap<String, AttachmentInput>> {
    let Value::Object(map) = value else {
        return Err(CoreError::bad_request("_attachments must be an object"));
    };
    let mut out = BTreeMap::new();
    for (name, att) in map {
        if name.is_empty() || name.starts_with('_') {
            return Err(CoreError::bad_request(format!(
                "invalid attachment name {name:?}"
            )));
        }
        let Value::Object(att) = att else {
            return Err(CoreError::bad_request(format!(
                "attachment {name} must be an object"
            )));
        };
        let is_stub = att.get("stub").and_then(Value::as_bool).unwrap_or(false);
        let input = if is_stub {
            AttachmentInput::Stub {
                digest: att.get("digest").and_then(Value::as_str).map(String::from),
            }
        } else {
            let data = att.get("data").and_then(Value::as_str).ok_or_else(|| {
                CoreError::bad_request(format!("attachment {name} needs data or stub"))
            })?;
            let data = decode_base64(data).map_err(|e| {
                CoreError::bad_request(format!("attachment {name}: {e}"))
            })?;
            AttachmentInput::Inline {
                content_type: att
                    .get("content_type")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                data,
            }
        };
        out.insert(name, input);
    }
    Ok(out)
}

/// Parses a local document revision `0-N`, returning `N`.
pub(crate) fn parse_local_rev(id: &str, rev: &str) -> CoreResult<u64> {
    rev.strip_prefix("0-")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CoreError::rev_conflict(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> CoreResult<Edit> {
        parse_edit(value, true, || "generated".to_string())
    }

    fn versioned(value: Value) -> ParsedDoc {
        match parse(value).unwrap() {
            Edit::Versioned(doc) => doc,
            Edit::Local(_) => panic!("expected a versioned document"),
        }
    }

    #[test]
    fn splits_reserved_fields_from_body() {
        let doc = versioned(json!({"_id": "a", "_rev": "1-x", "name": "n"}));
        assert_eq!(doc.id, "a");
        assert_eq!(doc.rev, Some(Revision::new(1, "x")));
        assert_eq!(Value::Object(doc.body), json!({"name": "n"}));
    }

    #[test]
    fn missing_id_is_generated() {
        assert_eq!(versioned(json!({"x": 1})).id, "generated");
    }

    #[test]
    fn rejects_non_objects_and_unknown_specials() {
        assert!(matches!(parse(json!([1])), Err(CoreError::BadRequest { .. })));
        assert!(matches!(
            parse(json!({"_id": "a", "_foo": 1})),
            Err(CoreError::BadRequest { .. })
        ));
    }

    #[test]
    fn id_validation() {
        assert!(validate_id("plain").is_ok());
        assert!(validate_id("_design/app").is_ok());
        assert!(validate_id("_local/cp").is_ok());
        for bad in ["", "_x", "_design/", "_local/"] {
            assert!(
                matches!(validate_id(bad), Err(CoreError::InvalidId { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(matches!(
            parse(json!({"_id": 5})),
            Err(CoreError::InvalidId { .. })
        ));
    }

    #[test]
    fn bad_rev_is_invalid_rev() {
        assert!(matches!(
            parse(json!({"_id": "a", "_rev": "nope"})),
            Err(CoreError::InvalidRev { .. })
        ));
    }

    #[test]
    fn replication_requires_id_and_rev() {
        let gen = || "g".to_string();
        assert!(parse_edit(json!({"x": 1}), false, gen).is_err());
        assert!(parse_edit(json!({"_id": "a"}), false, gen).is_err());
        assert!(parse_edit(json!({"_id": "a", "_rev": "1-x"}), false, gen).is_ok());
    }

    #[test]
    fn revisions_expand_newest_first() {
        let doc = versioned(json!({
            "_id": "a",
            "_rev": "3-c",
            "_revisions": {"start": 3, "ids": ["c", "b", "a"]}
        }));
        assert_eq!(
            doc.revisions.unwrap(),
            vec![Revision::new(3, "c"), Revision::new(2, "b"), Revision::new(1, "a")]
        );
        assert!(parse(json!({
            "_id": "a",
            "_rev": "3-z",
            "_revisions": {"start": 3, "ids": ["c"]}
        }))
        .is_err());
        assert!(parse(json!({
            "_id": "a",
            "_revisions": {"start": 1, "ids": ["b", "a"]}
        }))
        .is_err());
    }

    #[test]
    fn attachments_inline_and_stub() {
        let doc = versioned(json!({
            "_id": "a",
            "_attachments": {
                "new.txt": {"content_type": "text/plain", "data": "aGVsbG8="},
                "old.txt": {"stub": true, "digest": "sha256-abc"}
            }
        }));
        assert_eq!(
            doc.attachments["new.txt"],
            AttachmentInput::Inline {
                content_type: "text/plain".into(),
                data: b"hello".to_vec()
            }
        );
        assert_eq!(
            doc.attachments["old.txt"],
            AttachmentInput::Stub {
                digest: Some("sha256-abc".into())
            }
        );
        assert!(parse(json!({"_id": "a", "_attachments": {"f": {"data": "%%%"}}})).is_err());
    }

    #[test]
    fn local_documents_keep_opaque_rev() {
        match parse(json!({"_id": "_local/cp", "_rev": "0-3", "seq": 9})).unwrap() {
            Edit::Local(doc) => {
                assert_eq!(doc.rev.as_deref(), Some("0-3"));
                assert_eq!(Value::Object(doc.body), json!({"seq": 9}));
            }
            Edit::Versioned(_) => panic!("expected a local document"),
        }
        assert_eq!(parse_local_rev("_local/cp", "0-3").unwrap(), 3);
        assert!(parse_local_rev("_local/cp", "1-3").is_err());
    }
}
