//! Stress tests for SofaDB.
//!
//! These exercise the document API under sustained and concurrent load.

use serde_json::json;
use sofadb_core::{BulkDocsOptions, ChangesOptions, Database, ErrorKind, GetOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        info!(
            test = name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            ops_per_second = format_args!("{:.2}", self.ops_per_second),
            "stress run finished"
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Number of distinct documents.
    pub doc_count: usize,
    /// Documents per bulk request.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            tasks: 4,
            doc_count: 100,
            batch_size: 50,
        }
    }
}

fn doc_id(i: usize) -> String {
    format!("doc-{i:05}")
}

/// Repeatedly updates `doc_count` documents, one revision at a time.
pub async fn stress_sequential_updates(db: &Database, config: &StressConfig) -> StressTestResult {
    let mut revs: Vec<Option<String>> = vec![None; config.doc_count.max(1)];
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let slot = i % revs.len();
        let mut doc = json!({"_id": doc_id(slot), "n": i});
        if let Some(rev) = &revs[slot] {
            doc["_rev"] = json!(rev);
        }
        match db.put(doc).await {
            Ok(written) => {
                revs[slot] = Some(written.rev);
                successful += 1;
            }
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Writes `operations` new documents in bulk requests.
pub async fn stress_bulk_writes(db: &Database, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let batch_size = config.batch_size.max(1);

    let mut next = 0;
    while next < config.operations {
        let end = (next + batch_size).min(config.operations);
        let docs = (next..end).map(|i| json!({"_id": doc_id(i), "n": i})).collect();
        match db.bulk_docs(docs, BulkDocsOptions::default()).await {
            Ok(results) => {
                for result in results {
                    if result.is_ok() {
                        successful += 1;
                    } else {
                        failed += 1;
                    }
                }
            }
            Err(_) => failed += end - next,
        }
        next = end;
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Increments one counter document from several tasks at once.
///
/// Each task retries on `rev_conflict`, so the final counter equals the
/// number of successful increments.
pub async fn stress_contended_counter(db: &Database, config: &StressConfig) -> StressTestResult {
    let first = db.put(json!({"_id": "counter", "value": 0})).await;
    if first.is_err() {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let tasks = config.tasks.max(1);
    let per_task = config.operations / tasks;

    let start = Instant::now();
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let db = db.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            tokio::spawn(async move {
                for _ in 0..per_task {
                    loop {
                        let Ok(doc) = db.get("counter", GetOptions::default()).await else {
                            failed.fetch_add(1, Ordering::Relaxed);
                            break;
                        };
                        let value = doc["value"].as_u64().unwrap_or(0);
                        let update = json!({"_id": "counter", "_rev": doc["_rev"], "value": value + 1});
                        match db.put(update).await {
                            Ok(_) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            Err(e) if e.kind() == ErrorKind::RevConflict => continue,
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Reads documents from several tasks while they exist.
pub async fn stress_concurrent_reads(db: &Database, config: &StressConfig) -> StressTestResult {
    let doc_count = config.doc_count.max(1);
    let docs = (0..doc_count).map(|i| json!({"_id": doc_id(i)})).collect();
    if db.bulk_docs(docs, BulkDocsOptions::default()).await.is_err() {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let tasks = config.tasks.max(1);
    let per_task = config.operations / tasks;

    let start = Instant::now();
    let handles: Vec<_> = (0..tasks)
        .map(|t| {
            let db = db.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            tokio::spawn(async move {
                for i in 0..per_task {
                    let id = doc_id((t * per_task + i) % doc_count);
                    match db.get(&id, GetOptions::default()).await {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Writes documents while a live feed follows along.
///
/// Succeeds when the feed reports every document written.
pub async fn stress_live_feed(db: &Database, config: &StressConfig) -> StressTestResult {
    let expected = config.operations;
    let Ok(mut feed) = db
        .changes_live(ChangesOptions {
            limit: Some(expected),
            ..ChangesOptions::default()
        })
        .await
    else {
        return StressTestResult::new(0, expected, Duration::ZERO);
    };

    let start = Instant::now();
    let writer = {
        let db = db.clone();
        tokio::spawn(async move {
            for i in 0..expected {
                let _ = db.put(json!({"_id": doc_id(i)})).await;
            }
        })
    };

    let mut seen = 0usize;
    while seen < expected {
        match tokio::time::timeout(Duration::from_secs(10), feed.recv()).await {
            Ok(Some(Ok(_))) => seen += 1,
            _ => break,
        }
    }
    writer.await.expect("Writer panicked");
    feed.cancel();

    StressTestResult::new(seen, expected - seen, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;

    fn small() -> StressConfig {
        StressConfig {
            operations: 400,
            tasks: 4,
            doc_count: 20,
            batch_size: 25,
        }
    }

    #[tokio::test]
    async fn test_sequential_updates() {
        let db = TestDatabase::memory().await;
        let result = stress_sequential_updates(&db, &small()).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        let info = db.info().await.unwrap();
        assert_eq!(info.doc_count, 20);
        assert_eq!(info.update_seq, 400);
    }

    #[tokio::test]
    async fn test_bulk_writes() {
        let db = TestDatabase::memory().await;
        let result = stress_bulk_writes(&db, &small()).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(db.info().await.unwrap().doc_count, 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contended_counter_loses_no_updates() {
        let db = TestDatabase::memory().await;
        let config = StressConfig {
            operations: 100,
            ..small()
        };
        let result = stress_contended_counter(&db, &config).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 100);
        let doc = db.get("counter", GetOptions::default()).await.unwrap();
        assert_eq!(doc["value"], 100);
        assert!(doc["_rev"].as_str().unwrap().starts_with("101-"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads() {
        let db = TestDatabase::memory().await;
        let result = stress_concurrent_reads(&db, &small()).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_feed_keeps_up() {
        let db = TestDatabase::memory().await;
        let config = StressConfig {
            operations: 200,
            ..small()
        };
        let result = stress_live_feed(&db, &config).await;
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);
    }

    #[tokio::test]
    async fn test_file_backed_updates() {
        let db = TestDatabase::file().await;
        let config = StressConfig {
            operations: 100,
            doc_count: 10,
            ..small()
        };
        let result = stress_sequential_updates(&db, &config).await;
        assert_eq!(result.failed_ops, 0);
        result.log_summary("file_backed_updates");
    }
}
