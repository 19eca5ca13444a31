//! A closable multi-consumer FIFO of tasks.
//!
//! [`TaskQueue`] is the intake of a [`WorkerPool`](crate::WorkerPool). Any
//! number of producers enqueue without blocking; any number of workers dequeue
//! in submission order. Closing the queue stops intake but keeps already
//! queued items retrievable, and every consumer sees end-of-stream once the
//! queue is both closed and empty.
//!
//! ## Memory
//!
//! By default the queue is **unbounded**: `enqueue` never blocks and never
//! fails while the queue is open, no matter how far behind the workers are.
//! That trades bounded memory for non-blocking submission. If producers can
//! outrun the workers indefinitely, use [`TaskQueue::bounded`], which rejects
//! with [`Error::QueueFull`] instead of growing.

use crate::{Error, Result};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore, mpsc};

struct Envelope<T> {
    item: T,
    // Held while the item sits in the queue; dropping it on dequeue frees the
    // slot.
    _permit: Option<OwnedSemaphorePermit>,
}

struct Limit {
    capacity: usize,
    slots: Arc<Semaphore>,
}

/// An unbounded (or optionally bounded) closable FIFO.
pub struct TaskQueue<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope<T>>>>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Envelope<T>>>,
    limit: Option<Limit>,
    len: AtomicUsize,
}

impl<T> TaskQueue<T> {
    /// Creates a queue that accepts items until closed.
    pub fn unbounded() -> Self {
        Self::with_limit(None)
    }

    /// Creates a queue that holds at most `capacity` undelivered items and
    /// rejects the rest with [`Error::QueueFull`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue capacity must be greater than 0".to_string(),
            });
        }
        Ok(Self::with_limit(Some(Limit {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        })))
    }

    fn with_limit(limit: Option<Limit>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: AsyncMutex::new(rx),
            limit,
            len: AtomicUsize::new(0),
        }
    }

    /// Appends `item` to the back of the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] if the queue has been closed.
    /// - [`Error::QueueFull`] if the queue is bounded and at capacity.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(Error::PoolClosed);
        };

        let permit = match &self.limit {
            Some(limit) => Some(Arc::clone(&limit.slots).try_acquire_owned().map_err(
                |_| Error::QueueFull {
                    capacity: limit.capacity,
                },
            )?),
            None => None,
        };

        self.len.fetch_add(1, Ordering::AcqRel);
        if sender.send(Envelope { item, _permit: permit }).is_err() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    /// Removes the item at the front of the queue, waiting for one if needed.
    ///
    /// Returns `None` once the queue is closed and drained. Cancel safe: if
    /// the future is dropped before it completes, no item is lost.
    pub async fn dequeue(&self) -> Option<T> {
        let envelope = self.receiver.lock().await.recv().await?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(envelope.item)
    }

    /// Removes and returns every item currently queued, without waiting for
    /// more.
    pub async fn drain(&self) -> Vec<T> {
        let mut receiver = self.receiver.lock().await;
        let mut drained = Vec::with_capacity(self.len());
        while let Ok(envelope) = receiver.try_recv() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            drained.push(envelope.item);
        }
        drained
    }

    /// Stops intake. Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        let sender = self.sender.lock().take();
        sender.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Number of items enqueued and not yet dequeued.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bound configured with [`TaskQueue::bounded`], if any.
    pub fn capacity(&self) -> Option<usize> {
        self.limit.as_ref().map(|limit| limit.capacity)
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
