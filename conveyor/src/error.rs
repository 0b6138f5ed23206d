//! Typed error taxonomy.
//!
//! Configuration errors ([`RegistryError`], [`OrchestratorError`]) surface
//! immediately and are never retried; run failures ([`JobError`]) are
//! classified retryable or permanent.

use thiserror::Error;

use crate::job::{InstanceId, JobState};

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Failure modes of a [`Queue`](crate::queue::Queue) operation.
///
/// Each variant carries the queue name for context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is closed (and, for gets, fully drained).
    #[error("queue `{0}` is closed")]
    Closed(String),
    /// The queue is at capacity and the put could not be accepted.
    #[error("queue `{0}` is full")]
    Full(String),
    /// A non-blocking get found the open queue empty.
    #[error("queue `{0}` is empty")]
    Empty(String),
}

/// Failures from the process-wide [`Registry`](crate::registry::Registry).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A definition is already registered under this name.
    #[error("definition `{0}` is already registered")]
    DuplicateName(String),
    /// No definition is registered under this name.
    #[error("definition `{0}` not found")]
    DefinitionNotFound(String),
    /// No queue exists under this name.
    #[error("queue `{0}` not found")]
    QueueNotFound(String),
    /// No instance exists with this id.
    #[error("instance `{0}` not found")]
    InstanceNotFound(InstanceId),
    /// The instance is not in a terminal state.
    #[error("instance `{0}` is not terminal")]
    NotTerminal(InstanceId),
    /// The definition still has live (non-terminal) instances.
    #[error("definition `{name}` is in use by {live} live instance(s)")]
    DefinitionInUse { name: String, live: usize },
}

/// Illegal lifecycle-state transitions of a
/// [`JobInstance`](crate::instance::JobInstance).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The instance is already in a terminal state.
    #[error("instance is already terminal ({0})")]
    AlreadyTerminal(JobState),
    /// The requested transition is not permitted from the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// Errors surfaced by the [`Orchestrator`](crate::api::Orchestrator) facade.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// An instance was requested with zero replicas.
    #[error("replica count must be greater than zero")]
    InvalidReplicas,
    /// The replication mode is incompatible with the instance spec (e.g.
    /// sharded mode without a shard-key function).
    #[error("replication mode mismatch")]
    ReplicationModeMismatch,
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A lifecycle transition failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// A failure returned by a run function, classified for retry handling.
///
/// Retryable errors consult the definition's retry policy; permanent errors
/// fail the instance immediately.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// A transient failure that may succeed on retry.
    #[error("retryable: {0}")]
    Retryable(String),
    /// A permanent failure that should not be retried.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl JobError {
    /// Construct a [`JobError::Retryable`].
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Construct a [`JobError::Permanent`].
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Whether this error is permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}
