//! Bounded-concurrency task queue.
//!
//! Admission is FIFO through a fair semaphore: tasks start in enqueue
//! order and at most `concurrency_limit` run at once. Each enqueue hands
//! back a future resolving with the task's output, but execution does not
//! depend on the caller polling it; fire-and-forget works.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};

/// Errors observable through a task's result future.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down before the task could run, or the task
    /// panicked before producing a result.
    #[error("task was canceled before completion")]
    Canceled,
}

/// Future handed back by [`TaskQueue::enqueue`].
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.map_err(|_| QueueError::Canceled))
    }
}

/// FIFO work pool with a fixed concurrency limit.
pub struct TaskQueue {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    concurrency_limit: usize,
}

impl TaskQueue {
    /// Creates a queue running at most `concurrency_limit` tasks at once.
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Admits a task. It starts once a slot frees up, in FIFO order
    /// relative to other enqueues (tokio's semaphore is fair).
    pub fn enqueue<T, F, Fut>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let semaphore = Arc::clone(&self.semaphore);
        let pending = Arc::clone(&self.pending);

        pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            pending.fetch_sub(1, Ordering::SeqCst);
            let Ok(_permit) = permit else {
                // Queue closed while waiting; dropping tx cancels the handle.
                return;
            };
            let result = task().await;
            let _ = tx.send(result);
        });

        TaskHandle { rx }
    }

    /// Number of admitted tasks that have not started yet.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Shuts the queue down. Waiting tasks are canceled; running tasks
    /// finish.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
