//! # SofaDB Testkit
//!
//! Test utilities for SofaDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - A small replicator for cross-database integration tests
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sofadb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_database() {
//!     let db = TestDatabase::memory().await;
//!     db.put(serde_json::json!({"_id": "a"})).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
