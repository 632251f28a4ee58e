//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use serde_json::json;
use sofadb_core::{Config, Database, Registry};
use sofadb_storage::{FileBackend, MemoryBackend};
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Verbosity follows `RUST_LOG`, defaulting to warnings.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another harness may have installed one already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database handle.
    pub db: Database,
    /// The registry the handle was opened through.
    pub registry: Arc<Registry>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Opens a fresh in-memory database named `test`.
    pub async fn memory() -> Self {
        Self::memory_with(Config::default()).await
    }

    /// Opens a fresh in-memory database with `config`.
    pub async fn memory_with(config: Config) -> Self {
        init_test_logging();
        let registry = Registry::new(config);
        registry.register(Arc::new(MemoryBackend::new()));
        let db = registry
            .open("test")
            .await
            .expect("Failed to open in-memory database");
        Self {
            db,
            registry,
            temp_dir: None,
        }
    }

    /// Opens a fresh file-backed database in a temporary directory.
    pub async fn file() -> Self {
        init_test_logging();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let registry = Registry::new(Config::default());
        registry.register(Arc::new(FileBackend::new(temp_dir.path())));
        let db = registry
            .open("test")
            .await
            .expect("Failed to open file database");
        Self {
            db,
            registry,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the storage directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Opens another database through the same registry.
    pub async fn sibling(&self, name: &str) -> Database {
        self.registry
            .open(name)
            .await
            .expect("Failed to open sibling database")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding `doc_count` documents `doc-000`, `doc-001`, ...
    pub async fn populated_database(doc_count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory().await;
        let docs = (0..doc_count)
            .map(|i| json!({"_id": format!("doc-{i:03}"), "index": i}))
            .collect();
        for result in test_db
            .bulk_docs(docs, Default::default())
            .await
            .expect("Failed to write documents")
        {
            result.expect("Failed to write document");
        }
        test_db
    }

    /// Creates a document whose winning revision has one conflicting sibling.
    ///
    /// Returns the database and the two leaf revisions, winner first.
    pub async fn conflicted_document(id: &str) -> (TestDatabase, String, String) {
        let test_db = TestDatabase::memory().await;
        let docs = vec![
            json!({"_id": id, "_rev": "2-aaa", "side": "a",
                   "_revisions": {"start": 2, "ids": ["aaa", "root"]}}),
            json!({"_id": id, "_rev": "2-bbb", "side": "b",
                   "_revisions": {"start": 2, "ids": ["bbb", "root"]}}),
        ];
        for result in test_db
            .bulk_docs(docs, sofadb_core::BulkDocsOptions::replicated())
            .await
            .expect("Failed to write conflicting revisions")
        {
            result.expect("Failed to write revision");
        }
        (test_db, "2-bbb".to_string(), "2-aaa".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofadb_core::GetOptions;

    #[tokio::test]
    async fn test_memory_database() {
        let test_db = TestDatabase::memory().await;
        assert_eq!(test_db.adapter(), "memory");
        assert!(test_db.path().is_none());
    }

    #[tokio::test]
    async fn test_file_database() {
        let test_db = TestDatabase::file().await;
        assert_eq!(test_db.adapter(), "file");
        assert!(test_db.path().is_some());
        test_db.put(json!({"_id": "x"})).await.unwrap();
        assert_eq!(test_db.info().await.unwrap().doc_count, 1);
    }

    #[tokio::test]
    async fn test_sibling_shares_registry() {
        let test_db = TestDatabase::memory().await;
        assert!(test_db.registry.is_open("test"));
        assert!(!test_db.registry.is_open("other"));
        let other = test_db.sibling("other").await;
        assert!(test_db.registry.is_open("other"));
        other.close().await.unwrap();
        assert!(!test_db.registry.is_open("other"));
    }

    #[tokio::test]
    async fn test_backend_without_batch_fetch() {
        let registry = Registry::new(Config::default());
        registry.register(Arc::new(MemoryBackend::without_batch_fetch()));
        let db = registry.open("plain").await.unwrap();
        let docs = (0..30).map(|i| json!({"_id": format!("d{i:02}")})).collect();
        db.bulk_docs(docs, Default::default()).await.unwrap();
        let rows = db
            .all_docs(sofadb_core::AllDocsOptions {
                skip: 5,
                limit: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 10);
        assert_eq!(rows.rows[0].id, "d05");
        assert_eq!(db.changes(Default::default()).await.unwrap().results.len(), 30);
    }

    #[tokio::test]
    async fn test_populated_scenario() {
        let test_db = scenarios::populated_database(10).await;
        let info = test_db.info().await.unwrap();
        assert_eq!(info.doc_count, 10);
        assert_eq!(info.update_seq, 10);
    }

    #[tokio::test]
    async fn test_conflicted_scenario() {
        let (test_db, winner, loser) = scenarios::conflicted_document("c").await;
        let opts = GetOptions {
            conflicts: true,
            ..GetOptions::default()
        };
        let doc = test_db.get("c", opts).await.unwrap();
        assert_eq!(doc["_rev"], json!(winner));
        assert_eq!(doc["_conflicts"], json!([loser]));
    }
}
