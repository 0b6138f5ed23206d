//! Conveyor - generic job/queue orchestration core.
//!
//! A foundational crate for wiring named, typed FIFO queues to registered
//! job definitions and driving replicated job instances through a
//! dispatching scheduler with retry, suspension, and backpressure.
//!
//! # Core Concepts
//!
//! - **Queue**: [`Queue`] is a named, typed FIFO channel with optional
//!   capacity bound. Closing a queue rejects further puts while gets drain
//!   whatever is buffered.
//!
//! - **JobDefinition**: an immutable template around a [`RunFunction`],
//!   with a poll interval, single-run flag, and [`RetryPolicy`].
//!
//! - **JobInstance**: a live binding of a definition to input/output queues
//!   with a replica count and [`ReplicationMode`], tracked through the
//!   `pending -> running -> completed/failed` lifecycle (with cooperative
//!   `running <-> suspended` in between).
//!
//! - **Registry**: [`Registry`] is the process-wide catalog of definitions,
//!   queues, and instances, shared by `Arc` and dependency-injected.
//!
//! - **Scheduler**: [`Scheduler`] spawns one worker per replica (plus a
//!   router when replicas share an input queue), applies the retry policy,
//!   and enforces concurrency limits through the [`Budget`].
//!
//! - **Orchestrator**: [`Orchestrator`] is the single entry point external
//!   callers use to register definitions, create queues and instances, and
//!   observe lifecycle [`InstanceEvent`]s.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use conveyor::{InstanceSpec, JobDefinition, Orchestrator, QueueConfig};
//!
//! let api = Orchestrator::new();
//! api.register_definition(JobDefinition::from_fn("double", |x: i64| x * 2))?;
//! api.create_queue("in", QueueConfig::default());
//! api.create_queue("out", QueueConfig::default());
//!
//! let id = api
//!     .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
//!     .await?;
//! ```

/// Api facade tying registry, scheduler, and event bus together.
///
/// The `api` module provides [`Orchestrator`] and [`InstanceSpec`] plus the
/// [`OrchestratorBuilder`] for explicit configuration.
pub mod api;

/// Budget management for dispatch concurrency limiting.
///
/// The `budget` module provides the [`Budget`] trait and the
/// [`InMemoryBudget`] implementation that tracks per-definition run counts.
pub mod budget;

/// Configuration structures for queues, scheduler, and event bus.
pub mod config;

/// Typed error taxonomy.
///
/// Configuration errors ([`RegistryError`], [`OrchestratorError`]) surface
/// immediately and are never retried; run failures ([`JobError`]) are
/// classified retryable or permanent.
pub mod error;

/// Event publishing and subscription system.
///
/// The `events` module provides [`EventPublisher`] / [`EventSubscriber`],
/// the [`InstanceEvent`] lifecycle payloads, and the broadcast-backed
/// [`InProcEventBus`].
pub mod events;

/// Job instances and their state machine.
pub mod instance;

/// Core job definitions and traits.
///
/// The `job` module defines [`JobDefinition`], the [`RunFunction`] trait,
/// [`JobState`], [`ReplicationMode`], [`ShardKey`], and [`InstanceId`].
pub mod job;

/// Typed FIFO queues.
pub mod queue;

/// Process-wide catalog of definitions, queues, and instances.
pub mod registry;

/// Retry policy and backoff computation.
pub mod retry;

/// Dispatch engine and shutdown signaling.
pub mod scheduler;

/// Tracing spans and metric recording helpers.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled with the `metrics` feature.
pub mod metrics;

pub use api::{InstanceSpec, Orchestrator, OrchestratorBuilder};
pub use budget::{Budget, BudgetConfig, BudgetToken, InMemoryBudget};
pub use config::{EventBusConfig, PutMode, QueueConfig, SchedulerConfig};
pub use error::{JobError, OrchestratorError, QueueError, QueueResult, RegistryError, StateError};
pub use events::{
    EventMeta, EventPublisher, EventSubscriber, InProcEventBus, InstanceEvent, InstanceEventPayload,
};
pub use instance::{InstanceFault, JobInstance};
pub use job::{
    shard_key_fn, InstanceId, JobDefinition, JobDefinitionBuilder, JobState, ReplicationMode,
    RunContext, RunFunction, ShardKey,
};
pub use queue::{Queue, QueueStats};
pub use registry::Registry;
pub use retry::{compute_retry_delay, next_attempt_outcome, RetryOutcome, RetryPolicy};
pub use scheduler::{Scheduler, ShutdownToken};
