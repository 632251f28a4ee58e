//! The document database handle.
//!
//! A [`Database`] is a cheap, cloneable handle to one named database. All
//! operations are asynchronous; storage work runs on the blocking pool.
//! Writes are serialized per database and wake live change feeds once
//! committed. A handle whose connection fails transparently reopens it on
//! the next call.

use crate::adapter::Adapter;
use crate::changes::{ChangesOptions, ChangesResponse, LiveChanges};
use crate::connection::Connection;
use crate::document::{parse_edit, Edit};
use crate::error::{CoreError, CoreResult};
use crate::options::{
    AllDocsOptions, AllDocsResponse, Attachment, BulkDocsOptions, CompactOptions,
    CompactionResult, DbInfo, GetOptions, OpenRevResult, OpenRevs, PurgeResult, RevsDiffEntry,
    WriteResult,
};
use crate::registry::Registry;
use crate::types::{is_local_id, Revision};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use sofadb_codec::encode_base64;
use sofadb_storage::StorageError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, warn};

const LIVE_BUFFER: usize = 64;

/// Maps a failed blocking task to a lost connection.
pub(crate) fn join_failure(err: JoinError) -> CoreError {
    CoreError::Storage(StorageError::ConnectionLost(err.to_string()))
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A handle to one database.
#[derive(Debug, Clone)]
pub struct Database {
    name: Arc<str>,
    registry: Arc<Registry>,
    conn: Arc<RwLock<Arc<Connection>>>,
}

impl Database {
    pub(crate) fn new(registry: Arc<Registry>, name: &str, conn: Arc<Connection>) -> Self {
        Self {
            name: Arc::from(name),
            registry,
            conn: Arc::new(RwLock::new(conn)),
        }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backend serving this handle.
    #[must_use]
    pub fn adapter(&self) -> &'static str {
        self.conn.read().backend()
    }

    /// Returns true once this handle has been closed or destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.read().is_closed()
    }

    async fn connection(&self) -> CoreResult<Arc<Connection>> {
        {
            let current = self.conn.read();
            if current.is_closed() {
                return Err(CoreError::DatabaseClosed);
            }
            if !current.is_invalid() {
                return Ok(Arc::clone(&current));
            }
        }
        let fresh = self.registry.connect(&self.name).await?;
        debug!(db = %self.name, "reacquired connection");
        *self.conn.write() = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// Runs `op` against the adapter on the blocking pool.
    ///
    /// A connection failure invalidates the connection before the error is
    /// returned.
    async fn run<T, F>(&self, conn: &Arc<Connection>, op: F) -> CoreResult<T>
    where
        F: FnOnce(&Adapter) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let adapter = Arc::clone(conn.adapter());
        let result = tokio::task::spawn_blocking(move || op(&adapter))
            .await
            .unwrap_or_else(|e| Err(join_failure(e)));
        if let Err(e) = &result {
            if e.is_connection_failure() {
                warn!(db = %self.name, error = %e, "storage connection failed");
                self.registry.invalidate(&self.name, conn);
            }
        }
        result
    }

    async fn read<T, F>(&self, op: F) -> CoreResult<T>
    where
        F: FnOnce(&Adapter) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        self.run(&conn, op).await
    }

    async fn write(
        &self,
        edits: Vec<CoreResult<Edit>>,
        new_edits: bool,
    ) -> CoreResult<Vec<CoreResult<WriteResult>>> {
        let conn = self.connection().await?;
        let _writer = conn.write_lock().lock().await;
        let outcome = self
            .run(&conn, move |adapter| adapter.bulk_docs(edits, new_edits))
            .await?;
        if let Some(seq) = outcome.update_seq {
            conn.notify(seq);
        }
        Ok(outcome.results)
    }

    async fn write_one(&self, edit: CoreResult<Edit>) -> CoreResult<WriteResult> {
        self.write(vec![edit], true)
            .await?
            .pop()
            .unwrap_or_else(|| Err(CoreError::bad_request("empty write")))
    }

    /// Reads a document.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the document or requested revision is
    /// unknown; see [`GetOptions`].
    pub async fn get(&self, id: &str, opts: GetOptions) -> CoreResult<Value> {
        let id = id.to_string();
        self.read(move |adapter| adapter.get(&id, &opts)).await
    }

    /// Reads the listed revisions, or every leaf.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` for [`OpenRevs::All`] on an unknown document.
    pub async fn get_open_revs(
        &self,
        id: &str,
        revs: OpenRevs,
        opts: GetOptions,
    ) -> CoreResult<Vec<OpenRevResult>> {
        let id = id.to_string();
        self.read(move |adapter| adapter.get_open_revs(&id, &revs, &opts))
            .await
    }

    /// Creates or updates a document identified by its `_id`.
    ///
    /// # Errors
    ///
    /// Returns `not_an_object`, `invalid_id` when `_id` is absent,
    /// `rev_conflict` when `_rev` is not a current leaf, or another
    /// validation error.
    pub async fn put(&self, doc: Value) -> CoreResult<WriteResult> {
        let Value::Object(fields) = &doc else {
            return Err(CoreError::NotAnObject);
        };
        if !fields.contains_key("_id") {
            return Err(CoreError::invalid_id("", "document needs an _id"));
        }
        self.write_one(parse_edit(doc, true, generate_id)).await
    }

    /// Creates a document, generating an id when it has none.
    ///
    /// # Errors
    ///
    /// As [`Database::put`].
    pub async fn post(&self, doc: Value) -> CoreResult<WriteResult> {
        if !doc.is_object() {
            return Err(CoreError::NotAnObject);
        }
        self.write_one(parse_edit(doc, true, generate_id)).await
    }

    /// Deletes a document by writing a deletion revision.
    ///
    /// # Errors
    ///
    /// Returns `rev_conflict` if `rev` is not a current leaf.
    pub async fn remove(&self, id: &str, rev: &str) -> CoreResult<WriteResult> {
        self.put(json!({"_id": id, "_rev": rev, "_deleted": true}))
            .await
    }

    /// Writes a batch of documents.
    ///
    /// Returns one result per input, in input order. Entries fail
    /// individually with document errors.
    ///
    /// # Errors
    ///
    /// Returns an error, and writes nothing, on a storage failure.
    pub async fn bulk_docs(
        &self,
        docs: Vec<Value>,
        opts: BulkDocsOptions,
    ) -> CoreResult<Vec<CoreResult<WriteResult>>> {
        let edits = docs
            .into_iter()
            .map(|doc| parse_edit(doc, opts.new_edits, generate_id))
            .collect();
        self.write(edits, opts.new_edits).await
    }

    /// Writes a batch given as a request body `{"docs": [...], "new_edits": bool}`.
    ///
    /// # Errors
    ///
    /// Returns `missing_bulk_docs` if `docs` is not an array, otherwise as
    /// [`Database::bulk_docs`].
    pub async fn bulk_docs_request(&self, request: Value) -> CoreResult<Vec<CoreResult<WriteResult>>> {
        let Value::Object(mut request) = request else {
            return Err(CoreError::NotAnObject);
        };
        let new_edits = match request.remove("new_edits") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => b,
            Some(_) => return Err(CoreError::bad_request("new_edits must be a boolean")),
        };
        let Some(Value::Array(docs)) = request.remove("docs") else {
            return Err(CoreError::MissingBulkDocs);
        };
        self.bulk_docs(docs, BulkDocsOptions { new_edits }).await
    }

    /// Lists documents by id.
    ///
    /// # Errors
    ///
    /// Returns `bad_request` if `keys` is combined with a key range.
    pub async fn all_docs(&self, opts: AllDocsOptions) -> CoreResult<AllDocsResponse> {
        self.read(move |adapter| adapter.all_docs(&opts)).await
    }

    /// Reports the documents changed after `opts.since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn changes(&self, opts: ChangesOptions) -> CoreResult<ChangesResponse> {
        self.read(move |adapter| adapter.changes(&opts)).await
    }

    /// Starts a live change feed.
    ///
    /// The feed first reports every change after `opts.since`, then keeps
    /// reporting new changes as writes commit. `descending` is ignored;
    /// `limit` caps the total number of changes delivered.
    ///
    /// # Errors
    ///
    /// Returns `database_closed` if the handle is closed.
    pub async fn changes_live(&self, opts: ChangesOptions) -> CoreResult<LiveChanges> {
        let conn = self.connection().await?;
        let mut notified = conn.subscribe();
        drop(conn);

        let (tx, rx) = mpsc::channel(LIVE_BUFFER);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let db = self.clone();
        let mut opts = ChangesOptions {
            descending: false,
            return_docs: true,
            ..opts
        };
        let mut remaining = opts.limit;

        let task = tokio::spawn(async move {
            loop {
                if remaining == Some(0) {
                    return;
                }
                let scan = ChangesOptions {
                    limit: remaining,
                    ..opts.clone()
                };
                match db.changes(scan).await {
                    Ok(response) => {
                        for change in response.results {
                            if flag.load(Ordering::SeqCst)
                                || tx.send(Ok(change)).await.is_err()
                            {
                                return;
                            }
                            if let Some(left) = remaining.as_mut() {
                                *left -= 1;
                            }
                        }
                        opts.since = opts.since.max(response.last_seq);
                    }
                    Err(e) => {
                        debug!(db = %db.name, error = %e, "live changes stopped");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
                if remaining == Some(0) {
                    return;
                }
                tokio::select! {
                    _ = cancel_rx.changed() => return,
                    msg = notified.recv() => match msg {
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => return,
                    },
                }
            }
        });
        Ok(LiveChanges::new(rx, cancel_tx, cancelled, task))
    }

    /// Reports which revisions this database is missing.
    ///
    /// # Errors
    ///
    /// Returns `invalid_rev` if a revision string is malformed.
    pub async fn revs_diff(
        &self,
        request: BTreeMap<String, Vec<String>>,
    ) -> CoreResult<BTreeMap<String, RevsDiffEntry>> {
        let parsed = request
            .into_iter()
            .map(|(id, revs)| {
                let revs = revs
                    .iter()
                    .map(|r| Revision::parse(r))
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok((id, revs))
            })
            .collect::<CoreResult<BTreeMap<_, _>>>()?;
        self.read(move |adapter| adapter.revs_diff(&parsed)).await
    }

    /// Removes the bodies of old revisions.
    ///
    /// Compactions of one database run one at a time.
    ///
    /// # Errors
    ///
    /// Returns `database_closed` if the database is closed before the
    /// compaction starts.
    pub async fn compact(&self, opts: CompactOptions) -> CoreResult<CompactionResult> {
        let conn = self.connection().await?;
        let retention = opts
            .retention
            .unwrap_or(conn.adapter().config().compaction_retention);
        conn.compactions()
            .run(|| async {
                let _writer = conn.write_lock().lock().await;
                self.run(&conn, move |adapter| adapter.compact(retention))
                    .await
            })
            .await
    }

    /// Removes a leaf revision as if it had never been written.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if `rev` is not a leaf of `id`.
    pub async fn purge(&self, id: &str, rev: &str) -> CoreResult<PurgeResult> {
        let rev = Revision::parse(rev)?;
        let id = id.to_string();
        let conn = self.connection().await?;
        let _writer = conn.write_lock().lock().await;
        self.run(&conn, move |adapter| adapter.purge(&id, &rev))
            .await
    }

    /// Summarizes the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn info(&self) -> CoreResult<DbInfo> {
        self.read(Adapter::info).await
    }

    /// Closes the database. Later calls on any handle fail with
    /// `database_closed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub async fn close(&self) -> CoreResult<()> {
        let conn = Arc::clone(&self.conn.read());
        self.registry.close_connection(&self.name, &conn).await
    }

    /// Closes the database and deletes its data.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be removed.
    pub async fn destroy(&self) -> CoreResult<()> {
        let conn = Arc::clone(&self.conn.read());
        self.registry.destroy_connection(&self.name, &conn).await
    }

    /// Reads a local document.
    ///
    /// # Errors
    ///
    /// Returns `invalid_id` for a non-local id, `missing_doc` if absent.
    pub async fn get_local(&self, id: &str) -> CoreResult<Value> {
        ensure_local(id)?;
        let id = id.to_string();
        self.read(move |adapter| adapter.get_local(&id)).await
    }

    /// Writes a local document.
    ///
    /// # Errors
    ///
    /// Returns `invalid_id` for a non-local id and `rev_conflict` for a
    /// stale `_rev`.
    pub async fn put_local(&self, doc: Value) -> CoreResult<WriteResult> {
        let id = doc.get("_id").and_then(Value::as_str).unwrap_or_default();
        ensure_local(id)?;
        self.put(doc).await
    }

    /// Deletes a local document.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if absent and `rev_conflict` for a stale rev.
    pub async fn remove_local(&self, id: &str, rev: &str) -> CoreResult<WriteResult> {
        ensure_local(id)?;
        self.remove(id, rev).await
    }

    /// Reads an attachment of the winning revision, or of `rev`.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the document or attachment is unknown.
    pub async fn get_attachment(
        &self,
        id: &str,
        name: &str,
        rev: Option<&str>,
    ) -> CoreResult<Attachment> {
        let rev = rev.map(Revision::parse).transpose()?;
        let id = id.to_string();
        let name = name.to_string();
        self.read(move |adapter| adapter.get_attachment(&id, &name, rev.as_ref()))
            .await
    }

    /// Adds or replaces an attachment, creating a new revision.
    ///
    /// Without `rev` the document must not exist yet (or be deleted).
    ///
    /// # Errors
    ///
    /// Returns `rev_conflict` if `rev` is stale or missing for an existing
    /// document.
    pub async fn put_attachment(
        &self,
        id: &str,
        name: &str,
        rev: Option<&str>,
        content_type: &str,
        data: &[u8],
    ) -> CoreResult<WriteResult> {
        let mut doc = match rev {
            Some(rev) => self.editable(id, rev).await?,
            None => match self.get(id, GetOptions::default()).await {
                Ok(_) => return Err(CoreError::rev_conflict(id)),
                Err(CoreError::MissingDoc { .. }) => {
                    let mut doc = Map::new();
                    doc.insert("_id".into(), Value::String(id.to_string()));
                    doc
                }
                Err(e) => return Err(e),
            },
        };
        let attachments = doc
            .entry("_attachments")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(attachments) = attachments {
            attachments.insert(
                name.to_string(),
                json!({"content_type": content_type, "data": encode_base64(data)}),
            );
        }
        self.put(Value::Object(doc)).await
    }

    /// Removes an attachment, creating a new revision.
    ///
    /// # Errors
    ///
    /// Returns `missing_doc` if the attachment does not exist and
    /// `rev_conflict` if `rev` is stale.
    pub async fn remove_attachment(&self, id: &str, name: &str, rev: &str) -> CoreResult<WriteResult> {
        let mut doc = self.editable(id, rev).await?;
        let removed = doc
            .get_mut("_attachments")
            .and_then(Value::as_object_mut)
            .and_then(|attachments| attachments.remove(name));
        if removed.is_none() {
            return Err(CoreError::missing(format!("{id}/{name}")));
        }
        self.put(Value::Object(doc)).await
    }

    /// Loads revision `rev` of `id` as the base for an edit.
    async fn editable(&self, id: &str, rev: &str) -> CoreResult<Map<String, Value>> {
        let opts = GetOptions::rev(Revision::parse(rev)?);
        match self.get(id, opts).await? {
            Value::Object(mut doc) => {
                doc.remove("_deleted");
                Ok(doc)
            }
            _ => Err(CoreError::NotAnObject),
        }
    }
}

fn ensure_local(id: &str) -> CoreResult<()> {
    if is_local_id(id) {
        Ok(())
    } else {
        Err(CoreError::invalid_id(id, "local documents need the _local/ prefix"))
    }
}
