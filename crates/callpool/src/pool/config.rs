use crate::{Error, Result};

/// Sizing of a [`WorkerPool`](crate::WorkerPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers, and therefore the maximum number of transport calls
    /// in flight at once.
    pub max_concurrent_tasks: usize,
    /// Maximum number of queued, not yet dequeued tasks. `None` leaves the
    /// queue unbounded.
    pub queue_capacity: Option<usize>,
}

impl PoolConfig {
    /// An unbounded pool running at most `max_concurrent_tasks` calls at once.
    pub const fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            max_concurrent_tasks,
            queue_capacity: None,
        }
    }

    /// Bounds the queue to `capacity` waiting tasks.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the pool would have no workers or a
    /// bounded queue without room.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_concurrent_tasks must be greater than 0".to_string(),
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(Error::InvalidConfig {
                reason: "queue capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
