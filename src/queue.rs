//! Serial execution queues.
//!
//! Every context is confined to one queue. A queue is a single worker
//! thread draining a channel of jobs in submission order. The worker stops
//! once every handle to the queue has been dropped and the backlog is empty.

use crate::error::{Result, StackError};
use crossbeam_channel::{bounded, unbounded, Sender};
use futures::channel::oneshot;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Queue whose worker is the current thread, if any.
    static CURRENT: RefCell<Option<(u64, Weak<QueueInner>)>> = const { RefCell::new(None) };
}

struct QueueInner {
    id: u64,
    label: String,
    sender: Sender<Job>,
}

/// Handle to a serial execution queue.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

impl ExecutionQueue {
    /// Spawn a new serial queue with its own worker thread.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (sender, receiver) = unbounded::<Job>();
        let inner = Arc::new(QueueInner {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.clone(),
            sender,
        });

        let id = inner.id;
        let weak = Arc::downgrade(&inner);
        let thread_label = label.clone();
        thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                CURRENT.with(|current| *current.borrow_mut() = Some((id, weak)));
                for job in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(queue = %thread_label, "job panicked on execution queue");
                    }
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn execution queue {label}: {e}"));

        Self { inner }
    }

    /// The queue whose worker is running the calling code, if any.
    pub fn current() -> Option<ExecutionQueue> {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .and_then(|(_, weak)| weak.upgrade())
                .map(|inner| ExecutionQueue { inner })
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the calling code runs on this queue's worker.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map_or(false, |(id, _)| *id == self.inner.id)
        })
    }

    /// Enqueue a job without waiting for it.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.sender.send(Box::new(job)).is_err() {
            error!(queue = %self.inner.label, "execution queue worker is gone; job dropped");
        }
    }

    /// Run a job on this queue and block until it returns.
    ///
    /// Runs inline when already on the queue.
    pub fn sync<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (tx, rx) = bounded(1);
        self.submit(move || {
            let _ = tx.send(job());
        });
        rx.recv().map_err(|_| StackError::QueueClosed)
    }

    /// Run a job on this queue, resolving once it has returned.
    pub fn run<T, F>(&self, job: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move || {
            let _ = tx.send(job());
        });
        async move { rx.await.map_err(|_| StackError::QueueClosed) }
    }
}

impl PartialEq for ExecutionQueue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ExecutionQueue {}

impl fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionQueue({}#{})", self.inner.label, self.inner.id)
    }
}
