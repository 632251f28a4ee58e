//! CBOR encoding of persisted records.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a record to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn to_cbor<T: Serialize + ?Sized>(record: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(record, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes a record from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
