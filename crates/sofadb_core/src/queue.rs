//! FIFO task queue.
//!
//! Serializes asynchronous tasks: at most one runs at a time and waiters
//! are admitted in arrival order. Each caller receives its own task's
//! result. Closing the queue fails every task that has not started yet,
//! including ones already waiting.

use crate::error::{CoreError, CoreResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// A FIFO gate for asynchronous tasks.
#[derive(Debug)]
pub struct TaskQueue {
    name: String,
    gate: Mutex<()>,
    waiting: AtomicUsize,
    closed: AtomicBool,
}

impl TaskQueue {
    /// Creates an open queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate: Mutex::new(()),
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Runs `task` once every earlier task has finished.
    ///
    /// # Errors
    ///
    /// Returns `database_closed` if the queue is closed before the task
    /// starts, otherwise the task's own result.
    pub async fn run<F, Fut, T>(&self, task: F) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        self.ensure_open()?;
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = self.gate.lock().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = self.ensure_open() {
            debug!(queue = %self.name, "dropping task queued before close");
            return Err(e);
        }
        let result = task().await;
        drop(guard);
        result
    }

    /// Closes the queue. Tasks that have not started fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting for their turn.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn tasks_run_in_arrival_order() {
        let queue = Arc::new(TaskQueue::new("test"));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue
                    .run(|| async move {
                        order.lock().push(i);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        Ok(i)
                    })
                    .await
            }));
            tokio::task::yield_now().await;
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failures_reach_only_their_caller() {
        let queue = TaskQueue::new("test");
        let failed: CoreResult<()> = queue
            .run(|| async { Err(CoreError::bad_request("boom")) })
            .await;
        assert!(matches!(failed, Err(CoreError::BadRequest { .. })));

        let ok = queue.run(|| async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn close_fails_waiting_and_future_tasks() {
        let queue = Arc::new(TaskQueue::new("test"));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .run(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiting = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run(|| async { Ok(()) }).await })
        };
        while queue.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        queue.close();
        release_tx.send(()).unwrap();

        assert!(running.await.unwrap().is_ok());
        assert_eq!(waiting.await.unwrap(), Err(CoreError::DatabaseClosed));
        assert_eq!(
            queue.run(|| async { Ok(()) }).await,
            Err(CoreError::DatabaseClosed)
        );
    }
}
