//! Bounded, per-worker command queue.
//!
//! The master holds one [`WorkerQueue`] per registered worker for dispatching
//! tasks and control commands (cancel, drain). Sends are non-blocking up to
//! a configurable timeout rather than unboundedly blocking the caller when a
//! worker falls behind.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Default queue capacity per worker.
pub const DEFAULT_CAPACITY: usize = 100;
/// Default timeout applied to [`WorkerQueue::send_timeout`].
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`WorkerQueue`] operations.
#[derive(Debug)]
pub enum QueueError {
    /// The queue is at capacity and no slot freed up within the timeout.
    Full {
        /// Maximum number of items the queue can hold.
        max: usize,
    },
    /// The send exceeded its configured timeout waiting for capacity.
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },
    /// The receiving half has been dropped; the worker is gone.
    Closed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { max } => write!(f, "queue is full (max {max})"),
            Self::Timeout { after } => write!(f, "send timed out after {after:?}"),
            Self::Closed => write!(f, "queue receiver has been dropped"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A bounded FIFO queue of commands addressed to a single worker.
///
/// Cloning a `WorkerQueue` shares the same underlying channel, so multiple
/// callers (e.g. the scheduler and an operator-initiated drain) can enqueue
/// onto the same worker concurrently; only one task should call
/// [`WorkerQueue::recv`] at a time (typically the worker's own dispatch
/// loop).
#[derive(Clone)]
pub struct WorkerQueue<T> {
    tx: mpsc::Sender<T>,
    rx: std::sync::Arc<Mutex<mpsc::Receiver<T>>>,
    capacity: usize,
}

impl<T: Send + 'static> WorkerQueue<T> {
    /// Create a queue with the given bounded capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: std::sync::Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    /// Create a queue with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Attempt to enqueue `item` immediately, failing if the queue is full.
    pub fn try_send(&self, item: T) -> Result<(), QueueError> {
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full {
                max: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Enqueue `item`, waiting up to `wait` for a free slot before giving up.
    pub async fn send_timeout(&self, item: T, wait: Duration) -> Result<(), QueueError> {
        match timeout(wait, self.tx.send(item)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Timeout { after: wait }),
        }
    }

    /// Enqueue `item` using [`DEFAULT_SEND_TIMEOUT`].
    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        self.send_timeout(item, DEFAULT_SEND_TIMEOUT).await
    }

    /// Receive the next queued item, or `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Maximum number of items this queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots currently available.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the queue is currently at capacity.
    pub fn is_full(&self) -> bool {
        self.available() == 0
    }
}
