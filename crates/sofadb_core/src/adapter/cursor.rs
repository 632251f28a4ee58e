//! Batched range scans.
//!
//! Range scans fetch rows in batches when the engine supports native bulk
//! range fetch, and fall back to advancing a single-row cursor when it does
//! not. Callers see the same sequence of batches either way.

use crate::error::CoreResult;
use sofadb_storage::{KeyRange, KvTransaction};
use std::ops::ControlFlow;

/// Where the next batch of a scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// Last key delivered; the next batch starts just past it.
    pub last_key: Vec<u8>,
}

/// Scans `range` of `collection` in batches of `batch_size`.
///
/// `on_batch(keys, values, continuation)` is called for every batch;
/// `continuation` is `None` on the final call. Returning
/// `ControlFlow::Break` stops the scan early.
pub fn run_batched_cursor<F>(
    txn: &KvTransaction,
    collection: &str,
    range: &KeyRange,
    descending: bool,
    batch_size: usize,
    batch_fetch: bool,
    mut on_batch: F,
) -> CoreResult<()>
where
    F: FnMut(Vec<Vec<u8>>, Vec<Vec<u8>>, Option<Continuation>) -> CoreResult<ControlFlow<()>>,
{
    let batch_size = batch_size.max(1);
    if batch_fetch {
        let mut range = range.clone();
        loop {
            let rows = txn.get_all(collection, &range, descending, Some(batch_size + 1))?;
            let more = rows.len() > batch_size;
            let (keys, values): (Vec<_>, Vec<_>) = rows.into_iter().take(batch_size).unzip();
            let continuation = match keys.last() {
                Some(last) if more => Some(Continuation {
                    last_key: last.clone(),
                }),
                _ => None,
            };
            let next = continuation.clone();
            if on_batch(keys, values, continuation)?.is_break() {
                return Ok(());
            }
            let Some(next) = next else {
                return Ok(());
            };
            range = if descending {
                range.with_upper(next.last_key, true)
            } else {
                range.with_lower(next.last_key, true)
            };
        }
    }

    let mut cursor = txn.cursor(collection, range.clone(), descending)?.peekable();
    loop {
        let mut keys = Vec::with_capacity(batch_size);
        let mut values = Vec::with_capacity(batch_size);
        while keys.len() < batch_size {
            match cursor.next() {
                Some((k, v)) => {
                    keys.push(k);
                    values.push(v);
                }
                None => break,
            }
        }
        let continuation = match keys.last() {
            Some(last) if cursor.peek().is_some() => Some(Continuation {
                last_key: last.clone(),
            }),
            _ => None,
        };
        let done = continuation.is_none();
        if on_batch(keys, values, continuation)?.is_break() || done {
            return Ok(());
        }
    }
}
