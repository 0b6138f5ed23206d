use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::retry::RetryPolicy;

/// Unique identifier for a job instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceId {
    /// Create a new instance ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job instance.
///
/// Transitions are monotonic except `Running <-> Suspended`; `Completed` and
/// `Failed` are terminal and absorbing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl JobState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Policy for distributing input items across an instance's replicas.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Every replica receives every item.
    Broadcast,
    /// Items are assigned to replicas in rotation, by arrival order.
    RoundRobin,
    /// Items are routed by a key function; equal keys land on the same
    /// replica. Requires a [`ShardKey`].
    Sharded,
}

impl ReplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::RoundRobin => "round-robin",
            Self::Sharded => "sharded",
        }
    }
}

impl Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key extraction for [`ReplicationMode::Sharded`] routing.
pub trait ShardKey<T>: Send + Sync {
    /// Shard key for an item; the scheduler routes to `key % replicas`.
    fn key(&self, item: &T) -> u64;
}

struct ShardKeyFn<F>(F);

impl<T, F> ShardKey<T> for ShardKeyFn<F>
where
    F: Fn(&T) -> u64 + Send + Sync,
{
    fn key(&self, item: &T) -> u64 {
        (self.0)(item)
    }
}

/// Wrap a plain closure as a [`ShardKey`].
pub fn shard_key_fn<T, F>(f: F) -> Arc<dyn ShardKey<T>>
where
    T: 'static,
    F: Fn(&T) -> u64 + Send + Sync + 'static,
{
    Arc::new(ShardKeyFn(f))
}

/// Execution context handed to every run invocation.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// Instance this invocation belongs to.
    pub instance_id: InstanceId,
    /// Name of the job definition being run.
    pub definition: String,
    /// Zero-based replica index within the instance.
    pub replica: usize,
}

/// The unit of work bound into a [`JobDefinition`].
///
/// `input` is `None` for source jobs that have no input queue bound; queue-fed
/// jobs always receive `Some`. Returned items are fanned out to every output
/// queue bound to the instance. Failures are classified by [`JobError`]:
/// retryable errors consult the definition's retry policy, permanent errors
/// fail the instance immediately.
#[async_trait]
pub trait RunFunction<T>: Send + Sync {
    async fn run(&self, ctx: &RunContext, input: Option<T>) -> Result<Vec<T>, JobError>;
}

struct MapFn<F>(F);

#[async_trait]
impl<T, F> RunFunction<T> for MapFn<F>
where
    T: Send + Sync + 'static,
    F: Fn(T) -> T + Send + Sync,
{
    async fn run(&self, _ctx: &RunContext, input: Option<T>) -> Result<Vec<T>, JobError> {
        Ok(input.map(|item| vec![(self.0)(item)]).unwrap_or_default())
    }
}

struct TryMapFn<F>(F);

#[async_trait]
impl<T, F> RunFunction<T> for TryMapFn<F>
where
    T: Send + Sync + 'static,
    F: Fn(T) -> Result<Vec<T>, JobError> + Send + Sync,
{
    async fn run(&self, _ctx: &RunContext, input: Option<T>) -> Result<Vec<T>, JobError> {
        match input {
            Some(item) => (self.0)(item),
            None => Ok(Vec::new()),
        }
    }
}

/// Immutable template for a unit of work.
///
/// Definitions are registered once and never mutated; instances hold an `Arc`
/// to the definition they were created from, so re-registering under the same
/// name only affects instances created afterwards.
pub struct JobDefinition<T> {
    name: String,
    run: Arc<dyn RunFunction<T>>,
    wait_time: Duration,
    single_run: bool,
    retry: RetryPolicy,
}

impl<T> Clone for JobDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
            wait_time: self.wait_time,
            single_run: self.single_run,
            retry: self.retry.clone(),
        }
    }
}

impl<T> std::fmt::Debug for JobDefinition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("wait_time", &self.wait_time)
            .field("single_run", &self.single_run)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> JobDefinition<T> {
    /// Start building a definition around a run function.
    pub fn builder(
        name: impl Into<String>,
        run: impl RunFunction<T> + 'static,
    ) -> JobDefinitionBuilder<T> {
        JobDefinitionBuilder {
            name: name.into(),
            run: Arc::new(run),
            wait_time: Duration::from_millis(500),
            single_run: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Definition around a plain item-to-item mapping closure.
    pub fn from_fn(name: impl Into<String>, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self::builder(name, MapFn(f)).build()
    }

    /// Definition around a fallible one-to-many mapping closure.
    pub fn from_try_fn(
        name: impl Into<String>,
        f: impl Fn(T) -> Result<Vec<T>, JobError> + Send + Sync + 'static,
    ) -> Self {
        Self::builder(name, TryMapFn(f)).build()
    }
}

impl<T> JobDefinition<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_function(&self) -> &Arc<dyn RunFunction<T>> {
        &self.run
    }

    /// Idle poll interval for source jobs with no input queue.
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Whether the instance completes after one successful run.
    pub fn single_run(&self) -> bool {
        self.single_run
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Builder for [`JobDefinition`].
pub struct JobDefinitionBuilder<T> {
    name: String,
    run: Arc<dyn RunFunction<T>>,
    wait_time: Duration,
    single_run: bool,
    retry: RetryPolicy,
}

impl<T> JobDefinitionBuilder<T> {
    /// Set the idle poll interval.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Run once instead of repeatedly.
    pub fn single_run(mut self) -> Self {
        self.single_run = true;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> JobDefinition<T> {
        JobDefinition {
            name: self.name,
            run: self.run,
            wait_time: self.wait_time,
            single_run: self.single_run,
            retry: self.retry,
        }
    }
}
