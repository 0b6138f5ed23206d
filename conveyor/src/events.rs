use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::InstanceId;

/// Metadata envelope attached to every instance event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub correlation_id: Uuid,
    pub instance_id: InstanceId,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(instance_id: InstanceId, correlation_id: Option<Uuid>) -> Self {
        Self {
            version: 1,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            instance_id,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle event for a job instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub meta: EventMeta,
    pub payload: InstanceEventPayload,
}

impl InstanceEvent {
    pub fn new(instance_id: InstanceId, payload: InstanceEventPayload) -> Self {
        Self {
            meta: EventMeta::new(instance_id, None),
            payload,
        }
    }
}

/// Event payload emitted for instance lifecycle transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum InstanceEventPayload {
    /// Instance was created and handed to the scheduler.
    Created {
        definition: String,
        replicas: usize,
    },
    /// A replica began a run invocation.
    Dispatched { replica: usize },
    /// A run invocation succeeded.
    RunSucceeded { replica: usize, outputs: usize },
    /// A run invocation failed (may be retryable).
    RunFailed {
        replica: usize,
        error: String,
        retryable: bool,
    },
    /// A retry was scheduled after a retryable failure.
    RetryScheduled {
        replica: usize,
        attempt: u32,
        delay_ms: u64,
    },
    /// Instance reached `completed`.
    Completed,
    /// Instance reached `failed` after exhausting retries (or a permanent
    /// error).
    Failed { attempts: u32 },
    /// Instance was suspended by external request.
    Suspended,
    /// Instance was resumed.
    Resumed,
    /// Terminal instance was removed from the registry.
    Retired,
}

/// Generic event publisher trait for publishing events of type `E`.
#[async_trait]
pub trait EventPublisher<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Publish an event to all subscribers.
    async fn publish(&self, event: E) -> anyhow::Result<()>;
}

/// Generic event subscriber trait for receiving events of type `E`.
pub trait EventSubscriber<E>: Send + Sync
where
    E: Clone + Send + Sync + 'static,
{
    /// Subscribe to events, returning a broadcast receiver.
    ///
    /// Multiple subscribers can receive the same events (fan-out).
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-process event bus using tokio broadcast channels.
///
/// Publishers never wait for slow subscribers; a subscriber that falls more
/// than the bus capacity behind observes `RecvError::Lagged` and keeps
/// receiving from the oldest retained event. Events do not leave the process;
/// bridge via [`EventPublisher`] for external pub/sub.
pub struct InProcEventBus<E> {
    sender: broadcast::Sender<E>,
    capacity: usize,
}

impl<E: Clone + Send + Sync + 'static> InProcEventBus<E> {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> std::fmt::Debug for InProcEventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[async_trait]
impl<E: Clone + Send + Sync + 'static> EventPublisher<E> for InProcEventBus<E> {
    async fn publish(&self, event: E) -> anyhow::Result<()> {
        // A send with no live subscribers is not an error; the event is
        // simply unobserved.
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl<E: Clone + Send + Sync + 'static> EventSubscriber<E> for InProcEventBus<E> {
    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}
