//! Task queue for the cross-thread registration handoff.
//!
//! Multi-producer/single-consumer FIFO: the acceptor (and in principle a
//! poller itself, for internal reposting) enqueue from any thread; only
//! the owning poller's thread drains. Backed by
//! `crossbeam_queue::SegQueue`, so enqueue never blocks and never drops —
//! bounding the handoff would amount to admission control, which the
//! reactor deliberately does not do.

use crossbeam_queue::SegQueue;

/// A thread-safe FIFO queue of pending tasks for one poller.
#[derive(Debug)]
pub(crate) struct TaskQueue<T> {
    inner: SegQueue<T>,
}

impl<T> TaskQueue<T> {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Enqueues a task. Callable from any thread.
    pub(crate) fn push(&self, task: T) {
        self.inner.push(task);
    }

    /// Dequeues the oldest task, if any. Called only by the owning
    /// poller's thread.
    pub(crate) fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Returns the number of queued tasks. A snapshot: concurrent
    /// producers may have changed it by the time the caller acts on it.
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
