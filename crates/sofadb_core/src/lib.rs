//! # SofaDB Core
//!
//! Multi-version document engine for SofaDB.
//!
//! This crate provides:
//! - Revision trees with deterministic winner selection and stemming
//! - An indexed storage adapter over [`sofadb_storage`] engines, with
//!   schema migrations
//! - The asynchronous [`Database`] API: reads, writes, bulk writes,
//!   attachments, local documents, compaction and purge
//! - One-shot and live change feeds
//! - A [`Registry`] that selects backends and shares connections
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sofadb_core::{GetOptions, Registry};
//!
//! # async fn demo() -> sofadb_core::CoreResult<()> {
//! let db = Registry::with_memory().open("notes").await?;
//! let written = db.put(json!({"_id": "hello", "text": "world"})).await?;
//! let doc = db.get("hello", GetOptions::default()).await?;
//! assert_eq!(doc["_rev"], json!(written.rev));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod changes;
mod config;
mod connection;
mod database;
mod document;
mod error;
mod options;
mod queue;
mod registry;
pub mod rev_tree;
mod types;

pub use changes::{
    Change, ChangeFilter, ChangeRev, ChangesOptions, ChangesResponse, ChangesStyle, LiveChanges,
};
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult, ErrorKind, MissingReason};
pub use options::{
    AllDocsOptions, AllDocsResponse, AllDocsRow, Attachment, BulkDocsOptions, CompactOptions,
    CompactionResult, DbInfo, GetOptions, OpenRevResult, OpenRevs, PurgeResult, RevsDiffEntry,
    RowValue, WriteResult,
};
pub use queue::TaskQueue;
pub use registry::Registry;
pub use rev_tree::{LeafInfo, MergeOutcome, MergeResult, RevNode, RevStatus, RevTree};
pub use types::{is_local_id, Revision, Seq, DESIGN_PREFIX, LOCAL_PREFIX};
