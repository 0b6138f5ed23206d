use serde::{Deserialize, Serialize};

/// Behavior of `put` on a bounded queue at capacity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum PutMode {
    /// Suspend the producer until space frees up or the queue closes.
    #[default]
    Block,
    /// Fail fast with `QueueError::Full`.
    Fail,
}

/// Configuration for queue capacity and backpressure.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of buffered items; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Full-queue behavior for bounded queues.
    pub put_mode: PutMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            put_mode: PutMode::Block,
        }
    }
}

impl QueueConfig {
    /// Bounded queue with the given capacity (blocking puts).
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            put_mode: PutMode::Block,
        }
    }

    /// Unbounded queue.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Set the put mode.
    pub fn with_put_mode(mut self, put_mode: PutMode) -> Self {
        self.put_mode = put_mode;
        self
    }
}

/// Configuration for the dispatching scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default maximum number of concurrent run invocations per definition.
    pub max_concurrent: usize,
    /// Capacity of the internal per-replica feed queues used when an
    /// instance runs with more than one replica.
    pub replica_feed_capacity: usize,
    /// Grace period for workers to finish during shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            replica_feed_capacity: 16,
            shutdown_grace_secs: 30,
        }
    }
}

/// Configuration for the in-process event bus.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Maximum number of buffered events per subscriber; slow subscribers
    /// observe `Lagged` past this.
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
