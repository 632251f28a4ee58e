//! # SofaDB Storage
//!
//! Ordered, transactional key-value capability for SofaDB.
//!
//! This crate is the lowest layer of SofaDB. Stores hold **named
//! collections** of byte keys to byte values; they do not interpret the
//! data they store.
//!
//! ## Design Principles
//!
//! - Keys are ordered bytewise; ranges and cursors walk them in either direction
//! - Every access happens inside a [`KvTransaction`] scoped to named collections
//! - Commits are atomic; concurrent writers to the same collection conflict
//! - The schema version and the set of collections only change in upgrade
//!   transactions
//! - Engines must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - process-local stores for tests and ephemeral data
//! - [`FileBackend`] - one image file per database
//!
//! ## Example
//!
//! ```rust
//! use sofadb_storage::{Backend, KeyRange, KvEngine, MemoryBackend, TxnMode};
//!
//! let backend = MemoryBackend::new();
//! let engine = backend.open("example").unwrap();
//!
//! let mut upgrade = engine.begin_upgrade(1).unwrap();
//! upgrade.create_collection("log").unwrap();
//! engine.commit(upgrade).unwrap();
//!
//! let mut txn = engine.begin(TxnMode::ReadWrite, &["log"]).unwrap();
//! let seq = txn.add_auto("log", b"hello".to_vec()).unwrap();
//! engine.commit(txn).unwrap();
//!
//! let txn = engine.begin(TxnMode::ReadOnly, &["log"]).unwrap();
//! let rows = txn.get_all("log", &KeyRange::all(), false, None).unwrap();
//! assert_eq!(rows[0].0, seq.to_be_bytes().to_vec());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod range;
mod store;
mod transaction;

pub use backend::{Backend, KvEngine};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileEngine};
pub use memory::{MemoryBackend, MemoryEngine};
pub use range::KeyRange;
pub use transaction::{KvCursor, KvTransaction, TxnMode};
