//! # SofaDB Codec
//!
//! Encoding and hashing for SofaDB.
//!
//! This crate provides:
//! - CBOR encoding of persisted records ([`to_cbor`], [`from_cbor`])
//! - Canonical JSON bytes, so equal documents hash identically
//! - Revision hashes and content-addressed attachment digests
//! - Base64 handling for inline attachment data
//!
//! ## Usage
//!
//! ```
//! use sofadb_codec::{attachment_digest, from_cbor, to_cbor};
//!
//! let bytes = to_cbor(&("doc", 7u64)).unwrap();
//! let decoded: (String, u64) = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, ("doc".to_string(), 7));
//!
//! assert!(attachment_digest(b"blob").starts_with("sha256-"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod digest;
mod error;
mod record;

pub use canonical::canonical_json;
pub use digest::{
    attachment_digest, decode_base64, encode_base64, hex_encode, rev_hash, DIGEST_PREFIX,
    REV_HASH_LEN,
};
pub use error::{CodecError, CodecResult};
pub use record::{from_cbor, to_cbor};
