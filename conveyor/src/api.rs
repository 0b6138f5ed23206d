use std::sync::Arc;

use tokio::sync::broadcast;

use crate::budget::{Budget, BudgetConfig, InMemoryBudget};
use crate::config::{EventBusConfig, QueueConfig, SchedulerConfig};
use crate::error::{OrchestratorError, RegistryError, StateError};
use crate::events::{EventPublisher, EventSubscriber, InProcEventBus, InstanceEvent, InstanceEventPayload};
use crate::instance::{InstanceFault, JobInstance};
use crate::job::{InstanceId, JobDefinition, JobState, ReplicationMode, ShardKey};
use crate::queue::{Queue, QueueStats};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// Description of a job instance to create.
pub struct InstanceSpec<T> {
    definition: String,
    input_queue: Option<String>,
    output_queues: Vec<String>,
    replicas: usize,
    mode: ReplicationMode,
    shard_key: Option<Arc<dyn ShardKey<T>>>,
}

impl<T> InstanceSpec<T> {
    /// Spec for one replica of `definition` in round-robin mode, with no
    /// queues bound yet.
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            input_queue: None,
            output_queues: Vec::new(),
            replicas: 1,
            mode: ReplicationMode::RoundRobin,
            shard_key: None,
        }
    }

    /// Bind the input queue by name.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.input_queue = Some(name.into());
        self
    }

    /// Bind an output queue by name (repeatable).
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output_queues.push(name.into());
        self
    }

    /// Set the replica count.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the replication mode.
    pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the shard key function (required for sharded mode).
    pub fn with_shard_key(mut self, key: Arc<dyn ShardKey<T>>) -> Self {
        self.shard_key = Some(key);
        self
    }
}

impl<T> std::fmt::Debug for InstanceSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSpec")
            .field("definition", &self.definition)
            .field("input_queue", &self.input_queue)
            .field("output_queues", &self.output_queues)
            .field("replicas", &self.replicas)
            .field("mode", &self.mode)
            .field("shard_key_set", &self.shard_key.is_some())
            .finish()
    }
}

/// Builder for [`Orchestrator`] with explicit configuration.
pub struct OrchestratorBuilder<T> {
    scheduler: SchedulerConfig,
    event_bus: EventBusConfig,
    budget: Option<Arc<dyn Budget<String>>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> Default for OrchestratorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> OrchestratorBuilder<T> {
    pub fn new() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            event_bus: EventBusConfig::default(),
            budget: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Set the scheduler configuration.
    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Set the event bus configuration.
    pub fn with_event_bus_config(mut self, config: EventBusConfig) -> Self {
        self.event_bus = config;
        self
    }

    /// Replace the default in-memory budget.
    pub fn with_budget(mut self, budget: Arc<dyn Budget<String>>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn build(self) -> Orchestrator<T> {
        let registry = Arc::new(Registry::new());
        let events = Arc::new(InProcEventBus::new(self.event_bus.capacity));
        let budget = self.budget.unwrap_or_else(|| {
            Arc::new(InMemoryBudget::new(BudgetConfig::with_default(
                self.scheduler.max_concurrent,
            )))
        });
        let scheduler = Arc::new(Scheduler::new(
            self.scheduler,
            Arc::clone(&registry),
            budget,
            events.clone() as Arc<dyn EventPublisher<InstanceEvent>>,
        ));
        Orchestrator {
            registry,
            scheduler,
            events,
        }
    }
}

/// Single entry point for queue, definition, and instance operations.
///
/// The orchestrator is an explicitly constructed, dependency-injected context
/// object; share it by `Arc` rather than through any process-global.
/// Concurrent registration and deregistration are serialized through the
/// registry's locks.
pub struct Orchestrator<T> {
    registry: Arc<Registry<T>>,
    scheduler: Arc<Scheduler<T>>,
    events: Arc<InProcEventBus<InstanceEvent>>,
}

impl<T: Clone + Send + Sync + 'static> Default for Orchestrator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Orchestrator<T> {
    /// Orchestrator with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> OrchestratorBuilder<T> {
        OrchestratorBuilder::new()
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<Registry<T>> {
        &self.registry
    }

    /// Register a job definition.
    pub fn register_definition(&self, definition: JobDefinition<T>) -> Result<(), RegistryError> {
        self.registry.register(definition)
    }

    /// Register a job definition, replacing an existing one. Instances
    /// created before this call keep the old definition.
    pub fn register_definition_overwrite(&self, definition: JobDefinition<T>) {
        self.registry.register_overwrite(definition)
    }

    /// Remove a definition; fails while live instances reference it.
    pub fn deregister_definition(&self, name: &str) -> Result<(), RegistryError> {
        self.registry.deregister(name)
    }

    /// Enumerate definitions filtered by name prefix/suffix.
    pub fn list_definitions(
        &self,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Vec<(String, Arc<JobDefinition<T>>)> {
        self.registry.list_definitions(prefix, suffix)
    }

    /// Get or create a queue by name.
    pub fn create_queue(&self, name: &str, config: QueueConfig) -> Arc<Queue<T>> {
        self.registry.queue(name, config)
    }

    /// Strict queue lookup.
    pub fn queue(&self, name: &str) -> Result<Arc<Queue<T>>, RegistryError> {
        self.registry.get_queue(name)
    }

    /// Close and remove a queue.
    pub fn delete_queue(&self, name: &str) -> Result<(), RegistryError> {
        self.registry.delete_queue(name)
    }

    /// Statistics for all queues.
    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.registry.queue_stats()
    }

    /// Create a job instance from a spec and hand it to the scheduler.
    ///
    /// All configuration errors fail fast here: unknown definitions or
    /// queues, zero replicas, and sharded mode without a key function. The
    /// instance never starts running in those cases.
    pub async fn create_instance(
        &self,
        spec: InstanceSpec<T>,
    ) -> Result<InstanceId, OrchestratorError> {
        if spec.replicas == 0 {
            return Err(OrchestratorError::InvalidReplicas);
        }
        if spec.mode == ReplicationMode::Sharded && spec.shard_key.is_none() {
            return Err(OrchestratorError::ReplicationModeMismatch);
        }

        let definition = self.registry.definition(&spec.definition)?;
        if let Some(name) = &spec.input_queue {
            self.registry.get_queue(name)?;
        }
        for name in &spec.output_queues {
            self.registry.get_queue(name)?;
        }

        let instance = Arc::new(JobInstance::new(
            definition,
            spec.input_queue,
            spec.output_queues,
            spec.replicas,
            spec.mode,
            spec.shard_key,
        ));
        let id = instance.id();
        self.registry.insert_instance(Arc::clone(&instance));

        let _ = self
            .events
            .publish(InstanceEvent::new(
                id,
                InstanceEventPayload::Created {
                    definition: spec.definition,
                    replicas: spec.replicas,
                },
            ))
            .await;

        self.scheduler.spawn(instance).await?;
        Ok(id)
    }

    /// Current state of an instance.
    pub fn instance_state(&self, id: InstanceId) -> Result<JobState, RegistryError> {
        Ok(self.registry.instance(id)?.state())
    }

    /// The recorded failure history of an instance.
    pub fn instance_faults(&self, id: InstanceId) -> Result<Vec<InstanceFault>, RegistryError> {
        Ok(self.registry.instance(id)?.faults())
    }

    /// Enumerate instances as `(id, state)` pairs.
    pub fn list_instances(&self, prefix: Option<&str>) -> Vec<(InstanceId, JobState)> {
        self.registry.list_instances(prefix)
    }

    /// Request cooperative suspension of an instance.
    ///
    /// Takes effect at the instance's next dispatch-cycle boundary; in-flight
    /// run invocations are not interrupted.
    pub async fn suspend_instance(&self, id: InstanceId) -> Result<(), OrchestratorError> {
        let instance = self.registry.instance(id)?;
        let state = instance.state();
        if state.is_terminal() {
            return Err(StateError::AlreadyTerminal(state).into());
        }
        if state == JobState::Suspended {
            return Ok(());
        }

        instance.transition(JobState::Suspended)?;
        let _ = self
            .events
            .publish(InstanceEvent::new(id, InstanceEventPayload::Suspended))
            .await;
        Ok(())
    }

    /// Resume a suspended instance.
    pub async fn resume_instance(&self, id: InstanceId) -> Result<(), OrchestratorError> {
        let instance = self.registry.instance(id)?;
        let state = instance.state();
        if state.is_terminal() {
            return Err(StateError::AlreadyTerminal(state).into());
        }
        if state == JobState::Running {
            return Ok(());
        }

        instance.transition(JobState::Running)?;
        let _ = self
            .events
            .publish(InstanceEvent::new(id, InstanceEventPayload::Resumed))
            .await;
        Ok(())
    }

    /// Remove a terminal instance from the registry.
    pub async fn retire_instance(&self, id: InstanceId) -> Result<(), OrchestratorError> {
        self.registry.retire(id)?;
        let _ = self
            .events
            .publish(InstanceEvent::new(id, InstanceEventPayload::Retired))
            .await;
        Ok(())
    }

    /// Subscribe to instance lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    /// Gracefully shut down the scheduler and all workers.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await
    }
}

impl<T> std::fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use std::time::Duration;
    use tokio::time::timeout;

    fn orchestrator() -> Orchestrator<i64> {
        let api = Orchestrator::new();
        api.register_definition(JobDefinition::from_fn("double", |x: i64| x * 2))
            .unwrap();
        api
    }

    #[tokio::test]
    async fn test_create_instance_unknown_definition() {
        let api = Orchestrator::<i64>::new();
        let err = api
            .create_instance(InstanceSpec::new("missing"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::Registry(RegistryError::DefinitionNotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_create_instance_unknown_queue_fails_fast() {
        let api = orchestrator();
        let err = api
            .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::Registry(RegistryError::QueueNotFound("in".to_string()))
        );
        // Nothing was left behind in the registry.
        assert!(api.list_instances(None).is_empty());
    }

    #[tokio::test]
    async fn test_create_instance_sharded_requires_key() {
        let api = orchestrator();
        api.create_queue("in", QueueConfig::default());
        api.create_queue("out", QueueConfig::default());

        let err = api
            .create_instance(
                InstanceSpec::new("double")
                    .with_input("in")
                    .with_output("out")
                    .with_replicas(2)
                    .with_mode(ReplicationMode::Sharded),
            )
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::ReplicationModeMismatch);
        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_suspend_resume_and_state_queries() {
        let api = orchestrator();
        api.create_queue("in", QueueConfig::default());
        api.create_queue("out", QueueConfig::default());
        let id = api
            .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
            .await
            .unwrap();

        // Suspend is idempotent.
        api.suspend_instance(id).await.unwrap();
        api.suspend_instance(id).await.unwrap();
        assert_eq!(api.instance_state(id).unwrap(), JobState::Suspended);

        api.resume_instance(id).await.unwrap();
        assert_eq!(api.instance_state(id).unwrap(), JobState::Running);

        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_suspend_terminal_instance_rejected() {
        let api = orchestrator();
        api.create_queue("in", QueueConfig::default());
        api.create_queue("out", QueueConfig::default());
        let id = api
            .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
            .await
            .unwrap();

        // Drain the instance to completion.
        api.queue("in").unwrap().close();
        let instance = api.registry().instance(id).unwrap();
        timeout(Duration::from_secs(2), instance.wait_terminal())
            .await
            .expect("instance should complete");

        let err = api.suspend_instance(id).await.unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::State(StateError::AlreadyTerminal(JobState::Completed))
        );

        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retire_instance_publishes_and_removes() {
        let api = orchestrator();
        api.create_queue("in", QueueConfig::default());
        api.create_queue("out", QueueConfig::default());
        let id = api
            .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
            .await
            .unwrap();
        let mut events = api.subscribe_events();

        api.queue("in").unwrap().close();
        let instance = api.registry().instance(id).unwrap();
        timeout(Duration::from_secs(2), instance.wait_terminal())
            .await
            .expect("instance should complete");

        api.retire_instance(id).await.unwrap();
        assert_eq!(
            api.instance_state(id).unwrap_err(),
            RegistryError::InstanceNotFound(id)
        );

        // A Retired event was observed.
        let mut retired = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event.payload, InstanceEventPayload::Retired) {
                retired = true;
            }
        }
        assert!(retired);

        api.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deregister_definition_through_facade() {
        let api = orchestrator();
        api.create_queue("in", QueueConfig::default());
        api.create_queue("out", QueueConfig::default());
        let id = api
            .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
            .await
            .unwrap();

        assert!(matches!(
            api.deregister_definition("double").unwrap_err(),
            RegistryError::DefinitionInUse { .. }
        ));

        api.queue("in").unwrap().close();
        let instance = api.registry().instance(id).unwrap();
        timeout(Duration::from_secs(2), instance.wait_terminal())
            .await
            .expect("instance should complete");

        api.deregister_definition("double").unwrap();
        api.shutdown().await.unwrap();
    }
}
