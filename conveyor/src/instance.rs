use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::StateError;
use crate::job::{InstanceId, JobDefinition, JobState, ReplicationMode, ShardKey};

/// One recorded run failure, kept on the instance for later inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceFault {
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
    /// Replica that observed the failure.
    pub replica: usize,
    /// Failed-attempt count for the work item at the time.
    pub attempt: u32,
    /// Error message from the run function.
    pub message: String,
    /// Whether the failure was classified retryable.
    pub retryable: bool,
}

/// A live, stateful binding of a [`JobDefinition`] to queues.
///
/// Many instances may share one definition (read-only, behind `Arc`); each
/// instance owns its own state cell. State transitions are atomic under a
/// mutex so two workers can never both record a terminal state, and every
/// transition wakes tasks parked on [`wait_resumed`](JobInstance::wait_resumed)
/// or [`wait_terminal`](JobInstance::wait_terminal).
pub struct JobInstance<T> {
    id: InstanceId,
    definition: Arc<JobDefinition<T>>,
    input_queue: Option<String>,
    output_queues: Vec<String>,
    replicas: usize,
    mode: ReplicationMode,
    shard_key: Option<Arc<dyn ShardKey<T>>>,
    cell: Mutex<StateCell>,
    state_changed: Notify,
}

struct StateCell {
    state: JobState,
    faults: Vec<InstanceFault>,
}

impl<T> JobInstance<T> {
    /// Bind a definition to queues. The instance starts out `Pending`.
    pub fn new(
        definition: Arc<JobDefinition<T>>,
        input_queue: Option<String>,
        output_queues: Vec<String>,
        replicas: usize,
        mode: ReplicationMode,
        shard_key: Option<Arc<dyn ShardKey<T>>>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            definition,
            input_queue,
            output_queues,
            replicas,
            mode,
            shard_key,
            cell: Mutex::new(StateCell {
                state: JobState::Pending,
                faults: Vec::new(),
            }),
            state_changed: Notify::new(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The definition this instance was created from. Re-registration under
    /// the same name does not affect this reference.
    pub fn definition(&self) -> &Arc<JobDefinition<T>> {
        &self.definition
    }

    pub fn input_queue(&self) -> Option<&str> {
        self.input_queue.as_deref()
    }

    pub fn output_queues(&self) -> &[String] {
        &self.output_queues
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn shard_key(&self) -> Option<&Arc<dyn ShardKey<T>>> {
        self.shard_key.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.cell.lock().state
    }

    /// Attempt a state transition, enforcing the lifecycle state machine.
    ///
    /// Transitioning to the current state is a no-op returning `Ok`. Once a
    /// terminal state is recorded every further transition fails with
    /// [`StateError::AlreadyTerminal`], so at most one terminal state is ever
    /// observable.
    pub fn transition(&self, to: JobState) -> Result<JobState, StateError> {
        let result = {
            let mut cell = self.cell.lock();
            let from = cell.state;
            if from == to {
                return Ok(to);
            }
            if from.is_terminal() {
                return Err(StateError::AlreadyTerminal(from));
            }
            if !transition_allowed(from, to) {
                return Err(StateError::InvalidTransition { from, to });
            }
            cell.state = to;
            Ok(to)
        };
        self.state_changed.notify_waiters();
        result
    }

    /// Transition only if the current state is `from` (compare-and-swap).
    ///
    /// Workers use this so a concurrent suspend or terminal transition is
    /// never overridden.
    pub fn transition_from(&self, from: JobState, to: JobState) -> Result<JobState, StateError> {
        let result = {
            let mut cell = self.cell.lock();
            let current = cell.state;
            if current != from || !transition_allowed(from, to) {
                return Err(StateError::InvalidTransition { from: current, to });
            }
            cell.state = to;
            Ok(to)
        };
        self.state_changed.notify_waiters();
        result
    }

    /// Record a run failure on the instance's history log.
    pub fn record_fault(&self, replica: usize, attempt: u32, message: String, retryable: bool) {
        let mut cell = self.cell.lock();
        cell.faults.push(InstanceFault {
            at: Utc::now(),
            replica,
            attempt,
            message,
            retryable,
        });
    }

    /// Snapshot of the recorded failure history.
    pub fn faults(&self) -> Vec<InstanceFault> {
        self.cell.lock().faults.clone()
    }

    /// Wait until the instance leaves `Suspended` (resume or terminal).
    pub async fn wait_resumed(&self) {
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state() != JobState::Suspended {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the instance is suspended or terminal.
    ///
    /// Workers blocked on input race this against the queue so a suspension
    /// requested while idle takes effect before the next item is claimed.
    pub async fn wait_interrupted(&self) {
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let state = self.state();
            if state == JobState::Suspended || state.is_terminal() {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the instance reaches a terminal state.
    pub async fn wait_terminal(&self) {
        loop {
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state().is_terminal() {
                return;
            }
            notified.await;
        }
    }
}

impl<T> std::fmt::Debug for JobInstance<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.cell.lock();
        f.debug_struct("JobInstance")
            .field("id", &self.id)
            .field("definition", &self.definition.name())
            .field("input_queue", &self.input_queue)
            .field("output_queues", &self.output_queues)
            .field("replicas", &self.replicas)
            .field("mode", &self.mode)
            .field("state", &cell.state)
            .field("fault_count", &cell.faults.len())
            .finish()
    }
}

fn transition_allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Suspended)
            | (Running, Suspended)
            | (Suspended, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Suspended, Completed)
            | (Suspended, Failed)
    )
}
