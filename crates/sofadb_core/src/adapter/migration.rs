//! Schema migrations.
//!
//! Migrations upgrade the physical schema of an existing database to the
//! version this build writes. They are:
//! - **Ordered**: versions start at 1 and have no gaps
//! - **Forward-only**: a database newer than this build is refused
//! - **Transactional**: each step runs in its own upgrade transaction and
//!   bumps the stored version on commit
//! - **Idempotent**: re-running a step over its own output changes nothing
//!
//! A fresh database runs the whole chain.

use super::schema::{
    attach_seq_key, doc_rev_key, seq_attach_key, DocMetadata, MetaRecord, SeqRecord,
    ATTACH_SEQ_BY_SEQ, ATTACH_SEQ_STORE, ATTACH_STORE, BY_SEQ, DOC_REV_INDEX, DOC_STORE,
    LOCAL_STORE, META_STORE,
};
use super::schema::{decode_seq, meta_key, SCHEMA_VERSION};
use crate::error::{CoreError, CoreResult};
use crate::types::LOCAL_PREFIX;
use sofadb_storage::{KeyRange, KvEngine, KvTransaction};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Version number of a schema.
pub type MigrationVersion = u32;

/// An operation performed during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Created a collection.
    CreateCollection {
        /// Name of the collection.
        name: String,
    },
    /// Filled an index collection from its primary.
    Backfill {
        /// Name of the filled collection.
        collection: String,
        /// Number of entries written.
        entries: usize,
    },
    /// Moved records between collections.
    Move {
        /// Source collection.
        from: String,
        /// Destination collection.
        to: String,
        /// Number of records moved.
        records: usize,
    },
}

/// Context passed to a migration step.
pub struct MigrationContext<'a> {
    /// The version the database had before this step.
    pub current_version: MigrationVersion,
    txn: &'a mut KvTransaction,
    operations: Vec<MigrationOperation>,
}

impl<'a> MigrationContext<'a> {
    fn new(current_version: MigrationVersion, txn: &'a mut KvTransaction) -> Self {
        Self {
            current_version,
            txn,
            operations: Vec::new(),
        }
    }

    /// The upgrade transaction.
    pub fn txn(&mut self) -> &mut KvTransaction {
        self.txn
    }

    /// Creates a collection unless it exists.
    pub fn create_collection(&mut self, name: &str) -> CoreResult<()> {
        if !self.txn.has_collection(name) {
            self.txn.create_collection(name)?;
            self.operations.push(MigrationOperation::CreateCollection {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Records a backfill.
    pub fn backfilled(&mut self, collection: &str, entries: usize) {
        self.operations.push(MigrationOperation::Backfill {
            collection: collection.to_string(),
            entries,
        });
    }

    /// Records a move.
    pub fn moved(&mut self, from: &str, to: &str, records: usize) {
        self.operations.push(MigrationOperation::Move {
            from: from.to_string(),
            to: to.to_string(),
            records,
        });
    }
}

/// A schema migration step.
pub trait Migration: Send + Sync {
    /// The schema version this step produces.
    fn version(&self) -> MigrationVersion;

    /// Short name for logs.
    fn name(&self) -> &str;

    /// Applies the step inside an upgrade transaction.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()>;
}

/// Result of running one migration.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// The version produced.
    pub version: MigrationVersion,
    /// The migration name.
    pub name: String,
    /// Operations the step performed.
    pub operations: Vec<MigrationOperation>,
}

/// Result of running all pending migrations.
#[derive(Debug, Clone)]
pub struct MigrationRunResult {
    /// Migrations that ran, in order.
    pub migrations: Vec<MigrationResult>,
    /// The schema version after the run.
    pub final_version: MigrationVersion,
}

/// Ordered set of migrations.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl MigrationManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// The built-in chain up to [`SCHEMA_VERSION`].
    #[must_use]
    pub fn standard() -> Self {
        let mut manager = Self::new();
        let steps: [Box<dyn Migration>; 5] = [
            Box::new(CreateCoreStores),
            Box::new(IndexDocRevs),
            Box::new(SplitLocalDocs),
            Box::new(CreateMetaStore),
            Box::new(IndexAttachmentSeqs),
        ];
        for step in steps {
            manager.migrations.insert(step.version(), step);
        }
        debug_assert_eq!(manager.latest_version(), SCHEMA_VERSION);
        manager
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Returns `bad_request` if the version is already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::bad_request(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Checks that versions start at 1 and have no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = i as MigrationVersion + 1;
            if *version != expected {
                return Err(CoreError::bad_request(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    /// Runs every migration newer than the engine's schema version.
    ///
    /// Stops at the first failure; steps that committed before it stay
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns `invalid_format` if the stored version is newer than the
    /// latest registered one, or the first failing step's error.
    pub fn run_pending(&self, engine: &dyn KvEngine) -> CoreResult<MigrationRunResult> {
        self.validate()?;
        let mut current = engine.schema_version()?;
        let latest = self.latest_version();
        if current > latest {
            return Err(CoreError::invalid_format(format!(
                "database {} has schema version {current}, this build reads up to {latest}",
                engine.name()
            )));
        }

        let mut results = Vec::new();
        for (&version, migration) in self.migrations.range(current + 1..) {
            let mut txn = engine.begin_upgrade(version)?;
            let mut ctx = MigrationContext::new(current, &mut txn);
            if let Err(e) = migration.up(&mut ctx) {
                warn!(db = engine.name(), version, name = migration.name(), error = %e, "migration failed");
                return Err(e);
            }
            let operations = ctx.operations;
            engine.commit(txn)?;
            info!(
                db = engine.name(),
                version,
                name = migration.name(),
                operations = operations.len(),
                "applied migration"
            );
            results.push(MigrationResult {
                version,
                name: migration.name().to_string(),
                operations,
            });
            current = version;
        }

        Ok(MigrationRunResult {
            migrations: results,
            final_version: current,
        })
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

struct CreateCoreStores;

impl Migration for CreateCoreStores {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "create_core_stores"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.create_collection(DOC_STORE)?;
        ctx.create_collection(BY_SEQ)?;
        ctx.create_collection(ATTACH_STORE)
    }
}

struct IndexDocRevs;

impl Migration for IndexDocRevs {
    fn version(&self) -> MigrationVersion {
        2
    }

    fn name(&self) -> &str {
        "index_doc_revs"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.create_collection(DOC_REV_INDEX)?;
        let txn = ctx.txn();
        let rows = txn.get_all(BY_SEQ, &KeyRange::all(), false, None)?;
        for (key, value) in &rows {
            let record = SeqRecord::decode(value)?;
            txn.put(DOC_REV_INDEX, doc_rev_key(&record.doc_id, &record.rev), key.clone())?;
        }
        ctx.backfilled(DOC_REV_INDEX, rows.len());
        Ok(())
    }
}

struct SplitLocalDocs;

impl Migration for SplitLocalDocs {
    fn version(&self) -> MigrationVersion {
        3
    }

    fn name(&self) -> &str {
        "split_local_docs"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.create_collection(LOCAL_STORE)?;
        let txn = ctx.txn();
        let range = KeyRange::prefix(LOCAL_PREFIX.as_bytes().to_vec());
        let rows = txn.get_all(DOC_STORE, &range, false, None)?;
        for (key, value) in &rows {
            txn.put(LOCAL_STORE, key.clone(), value.clone())?;
        }
        txn.delete_range(DOC_STORE, &range)?;
        ctx.moved(DOC_STORE, LOCAL_STORE, rows.len());
        Ok(())
    }
}

struct CreateMetaStore;

impl Migration for CreateMetaStore {
    fn version(&self) -> MigrationVersion {
        4
    }

    fn name(&self) -> &str {
        "create_meta_store"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.create_collection(META_STORE)?;
        let txn = ctx.txn();
        if txn.contains(META_STORE, &meta_key())? {
            return Ok(());
        }
        let mut doc_count = 0;
        for (_, value) in txn.get_all(DOC_STORE, &KeyRange::all(), false, None)? {
            if !DocMetadata::decode(&value)?.deleted {
                doc_count += 1;
            }
        }
        let meta = MetaRecord {
            doc_count,
            instance_id: uuid::Uuid::new_v4().to_string(),
            purge_seq: 0,
        };
        txn.put(META_STORE, meta_key(), meta.encode()?)?;
        debug!(doc_count, instance_id = %meta.instance_id, "created database metadata");
        Ok(())
    }
}

struct IndexAttachmentSeqs;

impl Migration for IndexAttachmentSeqs {
    fn version(&self) -> MigrationVersion {
        5
    }

    fn name(&self) -> &str {
        "index_attachment_seqs"
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.create_collection(ATTACH_SEQ_STORE)?;
        ctx.create_collection(ATTACH_SEQ_BY_SEQ)?;
        let txn = ctx.txn();
        let mut entries = 0;
        for (key, value) in txn.get_all(BY_SEQ, &KeyRange::all(), false, None)? {
            let seq = decode_seq(&key)?;
            for att in SeqRecord::decode(&value)?.attachments.values() {
                txn.put(ATTACH_SEQ_STORE, attach_seq_key(&att.digest, seq), Vec::new())?;
                txn.put(ATTACH_SEQ_BY_SEQ, seq_attach_key(seq, &att.digest), Vec::new())?;
                entries += 1;
            }
        }
        ctx.backfilled(ATTACH_SEQ_STORE, entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::schema::{seq_key, LocalRecord, ALL_STORES};
    use crate::rev_tree::RevTree;
    use crate::types::Revision;
    use serde_json::json;
    use sofadb_storage::{MemoryEngine, TxnMode};

    struct Step(MigrationVersion);

    impl Migration for Step {
        fn version(&self) -> MigrationVersion {
            self.0
        }

        fn name(&self) -> &str {
            "step"
        }

        fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
            ctx.create_collection(&format!("c{}", self.0))
        }
    }

    struct Failing;

    impl Migration for Failing {
        fn version(&self) -> MigrationVersion {
            2
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn up(&self, _ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
            Err(CoreError::bad_request("intentional failure"))
        }
    }

    #[test]
    fn fresh_database_runs_whole_chain() {
        let engine = MemoryEngine::standalone("fresh");
        let result = MigrationManager::standard().run_pending(&engine).unwrap();
        assert_eq!(result.final_version, SCHEMA_VERSION);
        assert_eq!(result.migrations.len(), 5);
        assert_eq!(engine.schema_version().unwrap(), SCHEMA_VERSION);

        let names = engine.collection_names().unwrap();
        for store in ALL_STORES {
            assert!(names.iter().any(|n| n == store), "{store} missing");
        }

        let again = MigrationManager::standard().run_pending(&engine).unwrap();
        assert!(again.migrations.is_empty());
    }

    #[test]
    fn duplicate_version_rejected() {
        let mut manager = MigrationManager::new();
        manager.register(Box::new(Step(1))).unwrap();
        assert!(manager.register(Box::new(Step(1))).is_err());
    }

    #[test]
    fn validate_detects_gaps() {
        let mut manager = MigrationManager::new();
        manager.register(Box::new(Step(1))).unwrap();
        manager.register(Box::new(Step(3))).unwrap();
        assert!(manager.validate().is_err());
    }

    #[test]
    fn failure_stops_execution() {
        let engine = MemoryEngine::standalone("failing");
        let mut manager = MigrationManager::new();
        manager.register(Box::new(Step(1))).unwrap();
        manager.register(Box::new(Failing)).unwrap();
        manager.register(Box::new(Step(3))).unwrap();

        assert!(manager.run_pending(&engine).is_err());
        assert_eq!(engine.schema_version().unwrap(), 1);
        assert_eq!(engine.collection_names().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn newer_database_is_refused() {
        let engine = MemoryEngine::standalone("future");
        engine.commit(engine.begin_upgrade(9).unwrap()).unwrap();
        let err = MigrationManager::standard().run_pending(&engine).unwrap_err();
        assert!(err.to_string().contains("schema version 9"));
    }

    /// Writes a version 1 database holding one document with an
    /// attachment and one local document stored among regular documents.
    fn seed_v1(engine: &dyn KvEngine) {
        let mut upgrade = engine.begin_upgrade(1).unwrap();
        for name in [DOC_STORE, BY_SEQ, ATTACH_STORE] {
            upgrade.create_collection(name).unwrap();
        }
        engine.commit(upgrade).unwrap();

        let rev = Revision::new(1, "aaa");
        let mut tree = RevTree::new();
        tree.merge(std::slice::from_ref(&rev), false, 0).unwrap();
        let record = SeqRecord {
            doc_id: "doc".into(),
            rev: rev.clone(),
            deleted: false,
            body: json!({"v": 1}).as_object().unwrap().clone(),
            attachments: [(
                "a.txt".to_string(),
                crate::adapter::schema::AttachmentRef {
                    digest: "sha256-d".into(),
                    content_type: "text/plain".into(),
                    length: 1,
                    revpos: 1,
                },
            )]
            .into(),
        };
        let meta = DocMetadata {
            id: "doc".into(),
            rev_tree: tree,
            winning_rev: rev.clone(),
            deleted: false,
            seq: 1,
            rev_map: [(rev, 1)].into(),
        };
        let local = LocalRecord {
            id: "_local/cp".into(),
            rev: "0-1".into(),
            body: json!({"since": 1}).as_object().unwrap().clone(),
        };

        let mut txn = engine
            .begin(TxnMode::ReadWrite, &[DOC_STORE, BY_SEQ, ATTACH_STORE])
            .unwrap();
        txn.add_auto(BY_SEQ, record.encode().unwrap()).unwrap();
        txn.put(DOC_STORE, b"doc".to_vec(), meta.encode().unwrap()).unwrap();
        txn.put(DOC_STORE, b"_local/cp".to_vec(), local.encode().unwrap())
            .unwrap();
        txn.put(ATTACH_STORE, b"sha256-d".to_vec(), b"x".to_vec()).unwrap();
        engine.commit(txn).unwrap();
    }

    #[test]
    fn version_one_database_is_upgraded_in_place() {
        let engine = MemoryEngine::standalone("legacy");
        seed_v1(&engine);

        let result = MigrationManager::standard().run_pending(&engine).unwrap();
        assert_eq!(result.migrations.len(), 4);
        assert_eq!(result.migrations[0].version, 2);

        let scope = [
            DOC_STORE,
            DOC_REV_INDEX,
            LOCAL_STORE,
            META_STORE,
            ATTACH_SEQ_STORE,
            ATTACH_SEQ_BY_SEQ,
        ];
        let txn = engine.begin(TxnMode::ReadOnly, &scope).unwrap();

        let rev = Revision::new(1, "aaa");
        assert_eq!(
            txn.get(DOC_REV_INDEX, &doc_rev_key("doc", &rev)).unwrap(),
            Some(seq_key(1))
        );
        assert!(txn.get(DOC_STORE, b"_local/cp").unwrap().is_none());
        let local = LocalRecord::decode(&txn.get(LOCAL_STORE, b"_local/cp").unwrap().unwrap())
            .unwrap();
        assert_eq!(local.rev, "0-1");

        let meta = MetaRecord::decode(&txn.get(META_STORE, &meta_key()).unwrap().unwrap())
            .unwrap();
        assert_eq!(meta.doc_count, 1);
        assert!(!meta.instance_id.is_empty());

        assert!(txn
            .contains(ATTACH_SEQ_STORE, &attach_seq_key("sha256-d", 1))
            .unwrap());
        assert!(txn
            .contains(ATTACH_SEQ_BY_SEQ, &seq_attach_key(1, "sha256-d"))
            .unwrap());
    }
}
