use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::{PutMode, QueueConfig};
use crate::error::{QueueError, QueueResult};

/// Named, typed FIFO channel with optional capacity bound.
///
/// Items are handed off in arrival order; with multiple producers the
/// interleaving is whatever order the puts landed in, nothing more. Once
/// [`close`](Queue::close) is called no further puts succeed, while gets
/// keep draining buffered items and fail with [`QueueError::Closed`] only
/// after the buffer is empty.
///
/// Blocking variants (`put`, `get`, `get_many`) suspend the calling task;
/// the `try_` variants never do. Backpressure on a bounded queue follows the
/// configured [`PutMode`]: producers either wait for space or fail fast with
/// [`QueueError::Full`]. Items are never dropped silently.
pub struct Queue<T> {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
    enqueued: u64,
    dequeued: u64,
}

enum PutRejected<T> {
    Closed,
    Full(T),
}

impl<T> Queue<T> {
    /// Create a queue with the given name and configuration.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                closed: false,
                enqueued: 0,
                dequeued: 0,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Unbounded queue with default configuration.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, QueueConfig::unbounded())
    }

    /// Queue name (its key in the registry).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured capacity; `None` means unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.config.capacity
    }

    /// Current number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue one item.
    ///
    /// Fails with [`QueueError::Closed`] once the queue is closed. On a full
    /// bounded queue this either suspends until space frees up
    /// ([`PutMode::Block`]) or fails with [`QueueError::Full`]
    /// ([`PutMode::Fail`]).
    pub async fn put(&self, item: T) -> QueueResult<()> {
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.put_now(item) {
                Ok(()) => return Ok(()),
                Err(PutRejected::Closed) => {
                    return Err(QueueError::Closed(self.name.clone()));
                }
                Err(PutRejected::Full(rejected)) => {
                    if self.config.put_mode == PutMode::Fail {
                        return Err(QueueError::Full(self.name.clone()));
                    }
                    item = rejected;
                }
            }

            notified.await;
        }
    }

    /// Enqueue one item without suspending.
    ///
    /// Fails with [`QueueError::Full`] on a full bounded queue regardless of
    /// the configured put mode.
    pub fn try_put(&self, item: T) -> QueueResult<()> {
        match self.put_now(item) {
            Ok(()) => Ok(()),
            Err(PutRejected::Closed) => Err(QueueError::Closed(self.name.clone())),
            Err(PutRejected::Full(_)) => Err(QueueError::Full(self.name.clone())),
        }
    }

    /// Enqueue a batch of items, returning how many landed.
    ///
    /// With [`PutMode::Block`] every item is enqueued (suspending as needed)
    /// unless the queue closes mid-batch, which surfaces as
    /// [`QueueError::Closed`]. With [`PutMode::Fail`] enqueueing stops at the
    /// first full rejection: the partial count is returned if anything
    /// landed, otherwise [`QueueError::Full`].
    pub async fn put_many(&self, items: impl IntoIterator<Item = T>) -> QueueResult<usize> {
        let mut count = 0usize;
        for item in items {
            match self.put(item).await {
                Ok(()) => count += 1,
                Err(QueueError::Full(_)) if count > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(count)
    }

    /// Dequeue the next item in FIFO order, suspending while the queue is
    /// empty. Fails with [`QueueError::Closed`] once closed and drained.
    pub async fn get(&self) -> QueueResult<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.buffer.pop_front() {
                    state.dequeued += 1;
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                if state.closed {
                    return Err(QueueError::Closed(self.name.clone()));
                }
            }

            notified.await;
        }
    }

    /// Dequeue without suspending.
    ///
    /// Fails with [`QueueError::Empty`] when nothing is buffered on an open
    /// queue, [`QueueError::Closed`] once closed and drained.
    pub fn try_get(&self) -> QueueResult<T> {
        let mut state = self.state.lock();
        if let Some(item) = state.buffer.pop_front() {
            state.dequeued += 1;
            drop(state);
            self.not_full.notify_one();
            return Ok(item);
        }
        if state.closed {
            Err(QueueError::Closed(self.name.clone()))
        } else {
            Err(QueueError::Empty(self.name.clone()))
        }
    }

    /// Dequeue up to `max` items: waits for the first, then drains whatever
    /// else is immediately available.
    pub async fn get_many(&self, max: usize) -> QueueResult<Vec<T>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let first = self.get().await?;
        let mut items = Vec::with_capacity(max.min(64));
        items.push(first);

        let freed = {
            let mut state = self.state.lock();
            let mut freed = 0usize;
            while items.len() < max {
                match state.buffer.pop_front() {
                    Some(item) => {
                        state.dequeued += 1;
                        freed += 1;
                        items.push(item);
                    }
                    None => break,
                }
            }
            freed
        };
        if freed > 0 {
            self.not_full.notify_waiters();
        }

        Ok(items)
    }

    /// Close the queue. Idempotent.
    ///
    /// Subsequent puts fail with [`QueueError::Closed`]; gets keep draining
    /// buffered items and then fail the same way. All suspended producers and
    /// consumers are woken.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Point-in-time snapshot of queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            name: self.name.clone(),
            sampled_at: Utc::now(),
            depth: state.buffer.len(),
            enqueued: state.enqueued,
            dequeued: state.dequeued,
            closed: state.closed,
        }
    }

    fn put_now(&self, item: T) -> Result<(), PutRejected<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PutRejected::Closed);
        }
        if let Some(cap) = self.config.capacity {
            if state.buffer.len() >= cap {
                return Err(PutRejected::Full(item));
            }
        }
        state.buffer.push_back(item);
        state.enqueued += 1;
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("capacity", &self.config.capacity)
            .field("depth", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Statistics for a single queue at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Number of items currently buffered.
    pub depth: usize,
    /// Total items enqueued since creation.
    pub enqueued: u64,
    /// Total items dequeued since creation.
    pub dequeued: u64,
    /// Whether the queue has been closed.
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = Queue::unbounded("fifo");
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();
        queue.put(3).await.unwrap();

        assert_eq!(queue.get().await.unwrap(), 1);
        assert_eq!(queue.get().await.unwrap(), 2);
        assert_eq!(queue.get().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_puts_and_drains_gets() {
        let queue = Queue::unbounded("drain");
        queue.put(10).await.unwrap();
        queue.put(20).await.unwrap();
        queue.close();

        assert_eq!(
            queue.put(30).await,
            Err(QueueError::Closed("drain".to_string()))
        );

        // Buffered items drain in order, then gets fail.
        assert_eq!(queue.get().await.unwrap(), 10);
        assert_eq!(queue.get().await.unwrap(), 20);
        assert_eq!(
            queue.get().await,
            Err(QueueError::Closed("drain".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue = Queue::<u32>::unbounded("twice");
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_try_get_empty_vs_closed() {
        let queue = Queue::<u32>::unbounded("try");
        assert_eq!(queue.try_get(), Err(QueueError::Empty("try".to_string())));
        queue.close();
        assert_eq!(queue.try_get(), Err(QueueError::Closed("try".to_string())));
    }

    #[tokio::test]
    async fn test_bounded_put_blocks_until_space() {
        let queue = Arc::new(Queue::new("bounded", QueueConfig::bounded(1)));
        queue.put(1).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(2).await })
        };

        // Producer should be parked on the full queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        // Freeing a slot unblocks it.
        assert_eq!(queue.get().await.unwrap(), 1);
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should unblock")
            .unwrap()
            .unwrap();
        assert_eq!(queue.get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bounded_fail_mode_rejects_when_full() {
        let config = QueueConfig::bounded(2).with_put_mode(PutMode::Fail);
        let queue = Queue::new("failfast", config);
        queue.put(1).await.unwrap();
        queue.put(2).await.unwrap();

        assert_eq!(
            queue.put(3).await,
            Err(QueueError::Full("failfast".to_string()))
        );
        // Nothing was dropped.
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_put_many_counts_and_partial_batches() {
        let queue = Queue::unbounded("batch");
        let count = queue.put_many(vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(count, 4);

        let config = QueueConfig::bounded(2).with_put_mode(PutMode::Fail);
        let small = Queue::new("small", config);
        let count = small.put_many(vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(small.len(), 2);

        // Nothing lands on a full queue in fail mode.
        assert_eq!(
            small.put_many(vec![5]).await,
            Err(QueueError::Full("small".to_string()))
        );
    }

    #[tokio::test]
    async fn test_get_many_drains_up_to_max() {
        let queue = Queue::unbounded("many");
        queue.put_many(vec![1, 2, 3, 4, 5]).await.unwrap();

        let items = queue.get_many(3).await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        // Fewer available than requested.
        let items = queue.get_many(10).await.unwrap();
        assert_eq!(items, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let queue = Arc::new(Queue::<u32>::unbounded("wake"));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close();

        let result = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed("wake".to_string())));
    }

    #[tokio::test]
    async fn test_concurrent_producers_interleave_by_arrival() {
        let queue = Arc::new(Queue::unbounded("interleave"));
        let mut producers = Vec::new();
        for base in [0u32, 100, 200] {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for i in 0..10 {
                    queue.put(base + i).await.unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        // All 30 items arrive exactly once; per-producer order is preserved.
        let mut seen: Vec<u32> = Vec::new();
        for _ in 0..30 {
            seen.push(queue.get().await.unwrap());
        }
        for base in [0u32, 100, 200] {
            let per_producer: Vec<u32> =
                seen.iter().copied().filter(|v| v / 100 == base / 100).collect();
            let expected: Vec<u32> = (base..base + 10).collect();
            assert_eq!(per_producer, expected);
        }
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let queue = Queue::unbounded("stats");
        queue.put_many(vec![1, 2, 3]).await.unwrap();
        queue.get().await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dequeued, 1);
        assert!(!stats.closed);
    }
}
