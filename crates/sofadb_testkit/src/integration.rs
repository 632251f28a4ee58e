//! Cross-crate integration test helpers.
//!
//! [`Replicator`] copies revisions between two databases the way a
//! replication peer would: read the source change feed, ask the target
//! which revisions it lacks, then write those with `new_edits = false`.
//! Progress is checkpointed in a local document on the target.

use serde_json::{json, Value};
use sofadb_core::{
    BulkDocsOptions, ChangesOptions, ChangesStyle, CoreError, CoreResult, Database, ErrorKind,
    GetOptions, OpenRevResult, OpenRevs, Seq,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of one replication pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Documents reported by the source change feed.
    pub docs_read: usize,
    /// Revisions written to the target.
    pub docs_written: usize,
    /// Source sequence the pass reached.
    pub last_seq: Seq,
}

/// One-way replicator between two databases.
#[derive(Debug, Clone)]
pub struct Replicator {
    source: Database,
    target: Database,
    batch_size: usize,
}

impl Replicator {
    /// Creates a replicator from `source` to `target`.
    pub fn new(source: &Database, target: &Database) -> Self {
        Self {
            source: source.clone(),
            target: target.clone(),
            batch_size: 50,
        }
    }

    /// Sets how many changes each batch covers.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn checkpoint_id(&self) -> String {
        format!("_local/replication-{}", self.source.name())
    }

    async fn read_checkpoint(&self) -> CoreResult<(Seq, Option<String>)> {
        match self.target.get_local(&self.checkpoint_id()).await {
            Ok(doc) => Ok((
                doc["last_seq"].as_u64().unwrap_or(0),
                doc["_rev"].as_str().map(String::from),
            )),
            Err(e) if e.kind() == ErrorKind::MissingDoc => Ok((0, None)),
            Err(e) => Err(e),
        }
    }

    async fn write_checkpoint(&self, seq: Seq, rev: Option<String>) -> CoreResult<String> {
        let mut doc = json!({"_id": self.checkpoint_id(), "last_seq": seq});
        if let Some(rev) = rev {
            doc["_rev"] = Value::String(rev);
        }
        Ok(self.target.put_local(doc).await?.rev)
    }

    /// Copies every revision the target is missing.
    ///
    /// # Errors
    ///
    /// Returns the first read or write failure; progress up to the last
    /// completed batch is kept.
    pub async fn run(&self) -> CoreResult<ReplicationStats> {
        let (mut since, mut checkpoint_rev) = self.read_checkpoint().await?;
        let mut stats = ReplicationStats {
            last_seq: since,
            ..ReplicationStats::default()
        };

        loop {
            let opts = ChangesOptions {
                limit: Some(self.batch_size),
                style: ChangesStyle::AllDocs,
                ..ChangesOptions::since(since)
            };
            let batch = self.source.changes(opts).await?;
            if batch.results.is_empty() {
                break;
            }
            stats.docs_read += batch.results.len();

            let request: BTreeMap<String, Vec<String>> = batch
                .results
                .iter()
                .map(|c| (c.id.clone(), c.changes.iter().map(|r| r.rev.clone()).collect()))
                .collect();
            let diff = self.target.revs_diff(request).await?;

            let mut docs = Vec::new();
            for (id, entry) in diff {
                let opts = GetOptions {
                    revs: true,
                    attachments: true,
                    ..GetOptions::default()
                };
                let found = self
                    .source
                    .get_open_revs(&id, OpenRevs::Revs(entry.missing), opts)
                    .await?;
                docs.extend(found.into_iter().filter_map(|r| match r {
                    OpenRevResult::Ok(doc) => Some(doc),
                    OpenRevResult::Missing(_) => None,
                }));
            }

            if !docs.is_empty() {
                let written = docs.len();
                for result in self
                    .target
                    .bulk_docs(docs, BulkDocsOptions::replicated())
                    .await?
                {
                    result?;
                }
                stats.docs_written += written;
            }

            since = batch.last_seq;
            stats.last_seq = since;
            checkpoint_rev = Some(self.write_checkpoint(since, checkpoint_rev).await?);
            debug!(
                source = self.source.name(),
                target = self.target.name(),
                since,
                "replicated batch"
            );
        }
        Ok(stats)
    }
}

/// Replicates in both directions.
///
/// # Errors
///
/// Returns the first replication failure.
pub async fn sync(a: &Database, b: &Database) -> CoreResult<(ReplicationStats, ReplicationStats)> {
    let push = Replicator::new(a, b).run().await?;
    let pull = Replicator::new(b, a).run().await?;
    Ok((push, pull))
}

/// Summarizes a database as `id -> (winning rev, deleted, leaf revs)`.
///
/// # Errors
///
/// Returns a read failure, or `bad_request` if the feed is inconsistent.
pub async fn snapshot(db: &Database) -> CoreResult<BTreeMap<String, (String, bool, Vec<String>)>> {
    let opts = ChangesOptions {
        style: ChangesStyle::AllDocs,
        ..ChangesOptions::default()
    };
    let mut out = BTreeMap::new();
    for change in db.changes(opts).await?.results {
        let open = db
            .get_open_revs(&change.id, OpenRevs::All, GetOptions::default())
            .await?;
        if open.len() != change.changes.len() {
            return Err(CoreError::bad_request(format!(
                "leaf count mismatch for {}",
                change.id
            )));
        }
        let mut leaves: Vec<String> = change.changes.into_iter().map(|c| c.rev).collect();
        let winning = leaves.first().cloned().unwrap_or_default();
        leaves.sort();
        out.insert(change.id, (winning, change.deleted, leaves));
    }
    Ok(out)
}
