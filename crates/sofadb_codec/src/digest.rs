//! Content digests for revisions and attachments.

use crate::canonical::canonical_json;
use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Prefix of attachment digests.
pub const DIGEST_PREFIX: &str = "sha256-";

/// Number of hex characters in a revision hash.
pub const REV_HASH_LEN: usize = 32;

/// Computes the hash part of a new revision.
///
/// The hash covers the parent revision, the deletion flag, the body and the
/// attachment digests, so identical edits from the same parent produce the
/// same revision on every replica.
///
/// # Errors
///
/// Returns an error if the body contains a non-finite number.
pub fn rev_hash(
    parent: Option<&str>,
    deleted: bool,
    body: &Value,
    attachments: &BTreeMap<String, String>,
) -> CodecResult<String> {
    let input = json!({
        "parent": parent,
        "deleted": deleted,
        "body": body,
        "attachments": attachments,
    });
    let bytes = canonical_json(&input)?;
    let digest = Sha256::digest(&bytes);
    let mut hash = hex_encode(&digest);
    hash.truncate(REV_HASH_LEN);
    Ok(hash)
}

/// Computes the content digest of an attachment body.
#[must_use]
pub fn attachment_digest(data: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{}", hex_encode(&Sha256::digest(data)))
}

/// Decodes base64 attachment data.
///
/// # Errors
///
/// Returns an error if `data` is not valid standard base64.
pub fn decode_base64(data: &str) -> CodecResult<Vec<u8>> {
    STANDARD.decode(data).map_err(|e| CodecError::InvalidBase64 {
        message: e.to_string(),
    })
}

/// Encodes attachment data as standard base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Lowercase hex encoding.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[usize::from(b >> 4)] as char);
        out.push(HEX[usize::from(b & 0x0f)] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev_hash_is_deterministic_and_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        let none = BTreeMap::new();
        let ha = rev_hash(None, false, &a, &none).unwrap();
        let hb = rev_hash(None, false, &b, &none).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), REV_HASH_LEN);
    }

    #[test]
    fn rev_hash_depends_on_parent_and_deletion() {
        let body = json!({"x": 1});
        let none = BTreeMap::new();
        let root = rev_hash(None, false, &body, &none).unwrap();
        let child = rev_hash(Some("1-abc"), false, &body, &none).unwrap();
        let deleted = rev_hash(None, true, &body, &none).unwrap();
        assert_ne!(root, child);
        assert_ne!(root, deleted);
    }

    #[test]
    fn attachment_digest_format() {
        let digest = attachment_digest(b"hello");
        assert_eq!(
            digest,
            "sha256-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn base64_roundtrip_and_rejection() {
        assert_eq!(decode_base64(&encode_base64(b"data")).unwrap(), b"data");
        assert!(matches!(
            decode_base64("not base64!"),
            Err(CodecError::InvalidBase64 { .. })
        ));
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0xff]), "00abff");
    }
}
