use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::Instrument;

use crate::budget::Budget;
use crate::config::{QueueConfig, SchedulerConfig};
use crate::error::{JobError, OrchestratorError};
use crate::events::{EventPublisher, InstanceEvent, InstanceEventPayload};
use crate::instance::JobInstance;
use crate::job::{JobState, ReplicationMode, RunContext};
use crate::queue::Queue;
use crate::retry::{next_attempt_outcome, RetryOutcome};
use crate::telemetry;

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the router sends an item.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Route {
    /// Duplicate to every replica (broadcast).
    All,
    /// Deliver to one replica feed.
    Slot(usize),
}

/// Routing policy for one item.
///
/// `rotation` is the count of items already routed (round-robin position),
/// `shard` the item's shard key when one is configured.
pub(crate) fn assign_slot(
    mode: ReplicationMode,
    rotation: usize,
    shard: Option<u64>,
    replicas: usize,
) -> Route {
    match mode {
        ReplicationMode::Broadcast => Route::All,
        ReplicationMode::RoundRobin => Route::Slot(rotation % replicas),
        ReplicationMode::Sharded => Route::Slot(shard.unwrap_or(0) as usize % replicas),
    }
}

/// Dispatch engine: binds instances to worker tasks and drives their
/// lifecycle.
///
/// For every spawned instance the scheduler runs one worker task per replica,
/// plus a router task when several replicas share one input queue. Each
/// worker iteration is a dispatch cycle: the boundary checks (shutdown,
/// terminal state, requested suspension) run before any new run invocation,
/// so suspension is cooperative and in-flight runs are never interrupted.
/// Failures go through the definition's retry policy; exhausting it (or a
/// permanent error) fails the instance and wakes everything parked on it.
pub struct Scheduler<T> {
    config: SchedulerConfig,
    registry: Arc<crate::registry::Registry<T>>,
    budget: Arc<dyn Budget<String>>,
    events: Arc<dyn EventPublisher<InstanceEvent>>,
    shutdown: ShutdownToken,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let worker_count = self
            .workers
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("workers", &worker_count)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Scheduler<T> {
    /// Create a scheduler over the given registry, budget, and event sink.
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<crate::registry::Registry<T>>,
        budget: Arc<dyn Budget<String>>,
        events: Arc<dyn EventPublisher<InstanceEvent>>,
    ) -> Self {
        Self {
            config,
            registry,
            budget,
            events,
            shutdown: ShutdownToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The scheduler's shutdown token.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Start driving an instance.
    ///
    /// Fails fast with [`OrchestratorError`] when a bound queue does not
    /// exist, the replica count is zero, or sharded mode lacks a key
    /// function; the instance never reaches `running` in those cases.
    ///
    /// # Panics
    ///
    /// Panics if asked to dispatch an instance already in a terminal state;
    /// that is an invariant violation (a logic bug in the caller), not a
    /// runtime condition to recover from.
    pub async fn spawn(&self, instance: Arc<JobInstance<T>>) -> Result<(), OrchestratorError> {
        if instance.state().is_terminal() {
            panic!(
                "dispatch requested for terminal instance {} ({})",
                instance.id(),
                instance.state()
            );
        }
        if instance.replicas() == 0 {
            return Err(OrchestratorError::InvalidReplicas);
        }
        if instance.mode() == ReplicationMode::Sharded && instance.shard_key().is_none() {
            return Err(OrchestratorError::ReplicationModeMismatch);
        }

        let input = match instance.input_queue() {
            Some(name) => Some(self.registry.get_queue(name)?),
            None => None,
        };
        let outputs = instance
            .output_queues()
            .iter()
            .map(|name| self.registry.get_queue(name))
            .collect::<Result<Vec<_>, _>>()?;

        let replicas = instance.replicas();
        let remaining = Arc::new(AtomicUsize::new(replicas));
        let mut handles = Vec::with_capacity(replicas + 1);

        // With several replicas sharing one input, a router task pulls items
        // off the shared queue and distributes them to per-replica feeds
        // according to the replication mode. A single replica reads the input
        // directly.
        let feeds: Vec<Option<Arc<Queue<T>>>> = match (&input, replicas) {
            (None, _) => vec![None; replicas],
            (Some(queue), 1) => vec![Some(Arc::clone(queue))],
            (Some(queue), _) => {
                let feeds: Vec<Arc<Queue<T>>> = (0..replicas)
                    .map(|replica| {
                        Arc::new(Queue::new(
                            format!("{}#r{}", instance.id(), replica),
                            QueueConfig::bounded(self.config.replica_feed_capacity),
                        ))
                    })
                    .collect();
                handles.push(tokio::spawn(Self::router_loop(
                    Arc::clone(&instance),
                    Arc::clone(queue),
                    feeds.clone(),
                    self.shutdown.clone(),
                )));
                feeds.into_iter().map(Some).collect()
            }
        };

        for (replica, feed) in feeds.into_iter().enumerate() {
            handles.push(tokio::spawn(Self::replica_loop(
                replica,
                Arc::clone(&instance),
                feed,
                outputs.clone(),
                Arc::clone(&self.budget),
                Arc::clone(&self.events),
                self.shutdown.clone(),
                Arc::clone(&remaining),
            )));
        }

        let mut workers = self.workers.lock().await;
        workers.extend(handles);
        Ok(())
    }

    /// Gracefully shut down all workers.
    ///
    /// Workers stop at their next cycle boundary; in-flight run invocations
    /// are awaited up to the configured grace period.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("initiating scheduler shutdown");
        self.shutdown.cancel();

        let handles = {
            let mut workers = self.workers.lock().await;
            std::mem::take(&mut *workers)
        };

        let grace = tokio::time::Duration::from_secs(self.config.shutdown_grace_secs);
        for handle in handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("worker task failed: {err:?}"),
                Err(_) => tracing::warn!("worker task timed out during shutdown"),
            }
        }

        tracing::info!("scheduler shutdown complete");
        Ok(())
    }

    async fn router_loop(
        instance: Arc<JobInstance<T>>,
        input: Arc<Queue<T>>,
        feeds: Vec<Arc<Queue<T>>>,
        shutdown: ShutdownToken,
    ) {
        let mode = instance.mode();
        let shard_key = instance.shard_key().cloned();
        let replicas = feeds.len();
        let mut rotation = 0usize;
        let span = telemetry::route_span(instance.id().to_string(), mode.as_str());

        async {
            loop {
                let item = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = instance.wait_terminal() => break,
                    got = input.get() => match got {
                        Ok(item) => item,
                        // Input closed and drained; let the replicas finish.
                        Err(_) => break,
                    }
                };

                let shard = shard_key.as_ref().map(|key| key.key(&item));
                let delivered = match assign_slot(mode, rotation, shard, replicas) {
                    Route::All => {
                        let mut delivered = true;
                        for feed in &feeds {
                            delivered = tokio::select! {
                                _ = shutdown.cancelled() => false,
                                _ = instance.wait_terminal() => false,
                                result = feed.put(item.clone()) => result.is_ok(),
                            };
                            if !delivered {
                                break;
                            }
                        }
                        delivered
                    }
                    Route::Slot(slot) => {
                        rotation = rotation.wrapping_add(1);
                        tokio::select! {
                            _ = shutdown.cancelled() => false,
                            _ = instance.wait_terminal() => false,
                            result = feeds[slot].put(item) => result.is_ok(),
                        }
                    }
                };
                if !delivered {
                    break;
                }
            }
            for feed in &feeds {
                feed.close();
            }
        }
        .instrument(span)
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn replica_loop(
        replica: usize,
        instance: Arc<JobInstance<T>>,
        feed: Option<Arc<Queue<T>>>,
        outputs: Vec<Arc<Queue<T>>>,
        budget: Arc<dyn Budget<String>>,
        events: Arc<dyn EventPublisher<InstanceEvent>>,
        shutdown: ShutdownToken,
        remaining: Arc<AtomicUsize>,
    ) {
        let definition = Arc::clone(instance.definition());
        let instance_id = instance.id();

        loop {
            // Cycle boundary: shutdown, terminal state, and requested
            // suspension are all observed here, before any new invocation.
            if shutdown.is_cancelled() {
                return;
            }
            match instance.state() {
                JobState::Completed | JobState::Failed => return,
                JobState::Suspended => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = instance.wait_resumed() => {}
                    }
                    continue;
                }
                JobState::Pending => {
                    if instance
                        .transition_from(JobState::Pending, JobState::Running)
                        .is_err()
                    {
                        // Lost a race with a suspend or terminal transition;
                        // re-evaluate.
                        continue;
                    }
                }
                JobState::Running => {}
            }

            let input_item = match &feed {
                Some(feed) => {
                    // Racing the queue against wait_interrupted means a
                    // suspension requested while this replica idles takes
                    // effect before the next item is claimed; once an item
                    // is claimed the run proceeds to its natural boundary.
                    let got = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = instance.wait_interrupted() => continue,
                        got = feed.get() => got,
                    };
                    match got {
                        Ok(item) => Some(item),
                        // Closed and drained: this replica's input is
                        // exhausted.
                        Err(_) => break,
                    }
                }
                None => None,
            };

            let succeeded = Self::run_with_retries(
                replica,
                &instance,
                &definition,
                input_item,
                &outputs,
                &budget,
                &events,
                &shutdown,
            )
            .await;

            match succeeded {
                RunVerdict::Success => {
                    if definition.single_run() {
                        break;
                    }
                    if feed.is_none() {
                        // Source jobs poll on their configured interval.
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(definition.wait_time()) => {}
                        }
                    }
                }
                RunVerdict::InstanceFailed => {
                    return;
                }
                RunVerdict::ShuttingDown => {
                    return;
                }
            }
        }

        // Natural finish: the last replica out completes the instance
        // (unless a failure got there first).
        if remaining.fetch_sub(1, Ordering::SeqCst) == 1
            && instance.transition(JobState::Completed).is_ok()
        {
            let _ = events
                .publish(InstanceEvent::new(
                    instance_id,
                    InstanceEventPayload::Completed,
                ))
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_with_retries(
        replica: usize,
        instance: &Arc<JobInstance<T>>,
        definition: &Arc<crate::job::JobDefinition<T>>,
        input_item: Option<T>,
        outputs: &[Arc<Queue<T>>],
        budget: &Arc<dyn Budget<String>>,
        events: &Arc<dyn EventPublisher<InstanceEvent>>,
        shutdown: &ShutdownToken,
    ) -> RunVerdict {
        let instance_id = instance.id();
        let ctx = RunContext {
            instance_id,
            definition: definition.name().to_string(),
            replica,
        };
        let policy = definition.retry_policy().clone();
        let mut failed_attempts: u32 = 0;

        loop {
            let token = tokio::select! {
                _ = shutdown.cancelled() => return RunVerdict::ShuttingDown,
                token = budget.acquire(definition.name().to_string()) => match token {
                    Ok(token) => token,
                    Err(err) => {
                        tracing::error!("budget acquire error: {err}");
                        return RunVerdict::ShuttingDown;
                    }
                },
            };

            let _ = events
                .publish(InstanceEvent::new(
                    instance_id,
                    InstanceEventPayload::Dispatched { replica },
                ))
                .await;

            let started = Instant::now();
            let span = telemetry::run_span(instance_id.to_string(), definition.name(), replica);
            let result = definition
                .run_function()
                .run(&ctx, input_item.clone())
                .instrument(span)
                .await;
            let elapsed = started.elapsed().as_secs_f64();

            if let Err(err) = budget.release(token).await {
                tracing::error!("budget release error: {err}");
            }

            match result {
                Ok(produced) => {
                    telemetry::record_run_outcome(definition.name(), "success", elapsed);
                    let count = produced.len();
                    for queue in outputs {
                        for item in &produced {
                            if let Err(err) = queue.put(item.clone()).await {
                                tracing::warn!(
                                    queue = queue.name(),
                                    "output write failed: {err}"
                                );
                            }
                        }
                        telemetry::record_items_enqueued(definition.name(), queue.name(), count);
                        telemetry::record_queue_depth(queue.name(), queue.len());
                    }
                    let _ = events
                        .publish(InstanceEvent::new(
                            instance_id,
                            InstanceEventPayload::RunSucceeded {
                                replica,
                                outputs: count,
                            },
                        ))
                        .await;
                    return RunVerdict::Success;
                }
                Err(JobError::Retryable(message)) => {
                    failed_attempts += 1;
                    telemetry::record_run_outcome(definition.name(), "retryable", elapsed);
                    instance.record_fault(replica, failed_attempts, message.clone(), true);
                    let _ = events
                        .publish(InstanceEvent::new(
                            instance_id,
                            InstanceEventPayload::RunFailed {
                                replica,
                                error: message,
                                retryable: true,
                            },
                        ))
                        .await;

                    match next_attempt_outcome(failed_attempts, &policy) {
                        RetryOutcome::Retry { delay_ms } => {
                            let _ = events
                                .publish(InstanceEvent::new(
                                    instance_id,
                                    InstanceEventPayload::RetryScheduled {
                                        replica,
                                        attempt: failed_attempts,
                                        delay_ms,
                                    },
                                ))
                                .await;
                            tokio::select! {
                                _ = shutdown.cancelled() => return RunVerdict::ShuttingDown,
                                _ = tokio::time::sleep(
                                    tokio::time::Duration::from_millis(delay_ms),
                                ) => {}
                            }
                        }
                        RetryOutcome::Exhausted => {
                            return Self::fail_instance(
                                instance,
                                events,
                                failed_attempts,
                            )
                            .await;
                        }
                    }
                }
                Err(JobError::Permanent(message)) => {
                    failed_attempts += 1;
                    telemetry::record_run_outcome(definition.name(), "failed", elapsed);
                    instance.record_fault(replica, failed_attempts, message.clone(), false);
                    let _ = events
                        .publish(InstanceEvent::new(
                            instance_id,
                            InstanceEventPayload::RunFailed {
                                replica,
                                error: message,
                                retryable: false,
                            },
                        ))
                        .await;
                    return Self::fail_instance(instance, events, failed_attempts).await;
                }
            }
        }
    }

    async fn fail_instance(
        instance: &Arc<JobInstance<T>>,
        events: &Arc<dyn EventPublisher<InstanceEvent>>,
        attempts: u32,
    ) -> RunVerdict {
        // Only the first terminal transition publishes; a concurrent
        // completion or failure already settled the instance.
        if instance.transition(JobState::Failed).is_ok() {
            let _ = events
                .publish(InstanceEvent::new(
                    instance.id(),
                    InstanceEventPayload::Failed { attempts },
                ))
                .await;
        }
        RunVerdict::InstanceFailed
    }
}

enum RunVerdict {
    Success,
    InstanceFailed,
    ShuttingDown,
}
