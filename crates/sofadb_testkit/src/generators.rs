//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random documents and revision
//! histories that maintain the engine's input rules.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for generating valid document ids.
pub fn doc_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating revision hashes.
pub fn rev_hash_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{8}").expect("Invalid regex")
}

/// Strategy for generating JSON leaf values.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for generating document bodies without reserved fields.
pub fn doc_body_strategy() -> impl Strategy<Value = Map<String, Value>> {
    let value = json_scalar_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    });
    prop::collection::btree_map("[a-z][a-z0-9]{0,7}", value, 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating a new document with an id and a body.
pub fn new_doc_strategy() -> impl Strategy<Value = Value> {
    (doc_id_strategy(), doc_body_strategy()).prop_map(|(id, mut body)| {
        body.insert("_id".into(), Value::String(id));
        Value::Object(body)
    })
}

/// Strategy for generating a linear history, newest hash first.
///
/// Yields `(start, ids)` as carried by `_revisions`.
pub fn rev_history_strategy(max_len: usize) -> impl Strategy<Value = (u64, Vec<String>)> {
    (1..=max_len.max(1), 0u64..4).prop_flat_map(|(len, stemmed)| {
        prop::collection::vec(rev_hash_strategy(), len)
            .prop_map(move |ids| (len as u64 + stemmed, ids))
    })
}

/// Strategy for generating a replicated document: a body plus an explicit
/// `_rev` and `_revisions` ancestry, possibly deleted.
pub fn replicated_doc_strategy(id: String) -> impl Strategy<Value = Value> {
    (doc_body_strategy(), rev_history_strategy(6), prop::bool::weighted(0.2)).prop_map(
        move |(mut body, (start, ids), deleted)| {
            body.insert("_id".into(), Value::String(id.clone()));
            body.insert("_rev".into(), Value::String(format!("{start}-{}", ids[0])));
            body.insert("_revisions".into(), json!({"start": start, "ids": ids}));
            if deleted {
                body.insert("_deleted".into(), Value::Bool(true));
            }
            Value::Object(body)
        },
    )
}

/// Strategy for generating several competing branches of one document.
///
/// Every branch shares the root `1-root`, so the tree stays connected.
pub fn branching_docs_strategy(id: String, branches: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        (prop::collection::vec(rev_hash_strategy(), 1..4), any::<bool>()),
        1..=branches.max(1),
    )
    .prop_map(move |specs| {
        specs
            .into_iter()
            .map(|(mut hashes, deleted)| {
                let start = hashes.len() as u64 + 1;
                let mut ids = hashes.clone();
                ids.push("root".into());
                let rev = format!("{start}-{}", hashes.remove(0));
                let mut doc = json!({
                    "_id": id.clone(),
                    "_rev": rev,
                    "_revisions": {"start": start, "ids": ids},
                });
                if deleted {
                    doc["_deleted"] = Value::Bool(true);
                }
                doc
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_doc_ids_are_not_reserved(id in doc_id_strategy()) {
            prop_assert!(!id.is_empty());
            prop_assert!(!id.starts_with('_'));
        }

        #[test]
        fn test_bodies_have_no_reserved_fields(body in doc_body_strategy()) {
            prop_assert!(body.keys().all(|k| !k.starts_with('_')));
        }

        #[test]
        fn test_history_fits_start((start, ids) in rev_history_strategy(5)) {
            prop_assert!(!ids.is_empty());
            prop_assert!(start >= ids.len() as u64);
        }

        #[test]
        fn test_branches_share_root(docs in branching_docs_strategy("d".into(), 4)) {
            for doc in &docs {
                let ids = doc["_revisions"]["ids"].as_array().unwrap();
                prop_assert_eq!(ids.last().unwrap(), "root");
                prop_assert_eq!(doc["_revisions"]["start"].as_u64().unwrap(), ids.len() as u64);
            }
        }
    }
}
