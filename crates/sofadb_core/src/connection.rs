//! Shared per-database connection state.

use crate::adapter::Adapter;
use crate::queue::TaskQueue;
use crate::types::Seq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

const NOTIFY_CAPACITY: usize = 64;

/// One open connection, shared by every handle to the same database.
#[derive(Debug)]
pub(crate) struct Connection {
    backend: &'static str,
    adapter: Arc<Adapter>,
    /// Serializes writers.
    write_lock: Mutex<()>,
    /// Compactions run one at a time.
    compactions: TaskQueue,
    notifier: broadcast::Sender<Seq>,
    invalid: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(backend: &'static str, adapter: Adapter) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let name = format!("{}/compaction", adapter.name());
        Self {
            backend,
            adapter: Arc::new(adapter),
            write_lock: Mutex::new(()),
            compactions: TaskQueue::new(name),
            notifier,
            invalid: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn backend(&self) -> &'static str {
        self.backend
    }

    pub(crate) fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    pub(crate) fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }

    pub(crate) fn compactions(&self) -> &TaskQueue {
        &self.compactions
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Seq> {
        self.notifier.subscribe()
    }

    /// Wakes live change feeds after a commit.
    pub(crate) fn notify(&self, seq: Seq) {
        // No receivers is fine.
        let _ = self.notifier.send(seq);
    }

    /// Marks the connection as failed; handles reopen on next use.
    pub(crate) fn invalidate(&self) {
        self.invalid.store(true, Ordering::SeqCst);
        self.adapter.engine().close();
    }

    pub(crate) fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::SeqCst)
    }

    /// Closes the connection for good.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.compactions.close();
        self.adapter.engine().close();
        self.notify(0);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
