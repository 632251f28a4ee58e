//! Change feed for observing committed writes.
//!
//! Every committed revision gets a sequence number. The change feed
//! reports, for each document changed after a given sequence, its latest
//! change: the document's current winning revision (or all its leaves)
//! at the sequence of its newest write.
//!
//! A one-shot request scans the sequence log once. A live feed scans,
//! then rescans from the last sequence it reported every time a write
//! commits, until it is cancelled.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sofadb_core::{ChangesOptions, Registry};
//!
//! let db = Registry::with_memory().open("notes").await?;
//! let mut feed = db.changes_live(ChangesOptions::default()).await?;
//!
//! db.put(serde_json::json!({"_id": "a"})).await?;
//! let change = feed.recv().await.unwrap()?;
//! assert_eq!(change.id, "a");
//! feed.cancel();
//! ```

use crate::error::CoreResult;
use crate::types::Seq;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Predicate applied to each changed document.
pub type ChangeFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Which revisions a change lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangesStyle {
    /// Only the winning revision.
    #[default]
    MainOnly,
    /// Every leaf, winner first.
    AllDocs,
}

/// Options for a change feed request.
#[derive(Clone)]
pub struct ChangesOptions {
    /// Report changes after this sequence.
    pub since: Seq,
    /// Maximum number of changes.
    pub limit: Option<usize>,
    /// Newest first. Ignored by live feeds.
    pub descending: bool,
    /// Include winning documents.
    pub include_docs: bool,
    /// Include `_conflicts` in documents.
    pub conflicts: bool,
    /// Inline attachment bodies in documents.
    pub attachments: bool,
    /// Which revisions each change lists.
    pub style: ChangesStyle,
    /// Only these documents.
    pub doc_ids: Option<Vec<String>>,
    /// Only documents the predicate accepts.
    pub filter: Option<ChangeFilter>,
    /// Set to `false` to only learn `last_seq`.
    pub return_docs: bool,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            since: 0,
            limit: None,
            descending: false,
            include_docs: false,
            conflicts: false,
            attachments: false,
            style: ChangesStyle::MainOnly,
            doc_ids: None,
            filter: None,
            return_docs: true,
        }
    }
}

impl ChangesOptions {
    /// Changes after `since`.
    #[must_use]
    pub fn since(since: Seq) -> Self {
        Self {
            since,
            ..Self::default()
        }
    }

    /// Sets the filter predicate.
    #[must_use]
    pub fn filter(mut self, filter: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for ChangesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesOptions")
            .field("since", &self.since)
            .field("limit", &self.limit)
            .field("descending", &self.descending)
            .field("include_docs", &self.include_docs)
            .field("style", &self.style)
            .field("doc_ids", &self.doc_ids)
            .field("filter", &self.filter.is_some())
            .field("return_docs", &self.return_docs)
            .finish_non_exhaustive()
    }
}

/// A revision listed by a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    /// Revision string.
    pub rev: String,
}

/// One changed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Document id.
    pub id: String,
    /// Sequence of the document's latest write.
    pub seq: Seq,
    /// Winning revision, or every leaf.
    pub changes: Vec<ChangeRev>,
    /// Whether the winner is a deletion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Winning document when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Result of a one-shot change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Changes in sequence order.
    pub results: Vec<Change>,
    /// Last sequence examined, or `since` when nothing was.
    pub last_seq: Seq,
}

/// A running live change feed.
///
/// Dropping the handle cancels the feed.
#[derive(Debug)]
pub struct LiveChanges {
    rx: mpsc::Receiver<CoreResult<Change>>,
    cancel: watch::Sender<bool>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LiveChanges {
    pub(crate) fn new(
        rx: mpsc::Receiver<CoreResult<Change>>,
        cancel: watch::Sender<bool>,
        cancelled: Arc<AtomicBool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            cancel,
            cancelled,
            task,
        }
    }

    /// Waits for the next change.
    ///
    /// Returns `None` once the feed is cancelled or has ended. A storage
    /// failure is delivered once, after which the feed ends.
    pub async fn recv(&mut self) -> Option<CoreResult<Change>> {
        if self.is_cancelled() {
            return None;
        }
        let next = self.rx.recv().await;
        if self.is_cancelled() {
            None
        } else {
            next
        }
    }

    /// Stops the feed. No change is delivered afterwards.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.send_replace(true);
    }

    /// Returns true once the feed is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true once the background scanner has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LiveChanges {
    fn drop(&mut self) {
        self.cancel();
    }
}
