use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::QueueConfig;
use crate::error::RegistryError;
use crate::instance::JobInstance;
use crate::job::{InstanceId, JobDefinition, JobState};
use crate::queue::{Queue, QueueStats};

/// Process-wide catalog of job definitions, queues, and instances.
///
/// Names are unique per category; lookups fail with a typed `NotFound`
/// rather than returning nothing silently. The registry is shared by `Arc`
/// and dependency-injected, never a global; all mutation is serialized
/// through the per-map locks.
pub struct Registry<T> {
    definitions: RwLock<HashMap<String, Arc<JobDefinition<T>>>>,
    queues: RwLock<HashMap<String, Arc<Queue<T>>>>,
    instances: RwLock<HashMap<InstanceId, Arc<JobInstance<T>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition under its name.
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the name is taken; the
    /// registry is left unchanged in that case.
    pub fn register(&self, definition: JobDefinition<T>) -> Result<(), RegistryError> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(definition.name()) {
            return Err(RegistryError::DuplicateName(definition.name().to_string()));
        }
        definitions.insert(definition.name().to_string(), Arc::new(definition));
        Ok(())
    }

    /// Register a definition, replacing any existing one under the same name.
    ///
    /// Existing instances keep the definition they were created from; only
    /// instances created after this call see the replacement.
    pub fn register_overwrite(&self, definition: JobDefinition<T>) {
        let mut definitions = self.definitions.write();
        definitions.insert(definition.name().to_string(), Arc::new(definition));
    }

    /// Look up a definition by name.
    pub fn definition(&self, name: &str) -> Result<Arc<JobDefinition<T>>, RegistryError> {
        self.definitions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::DefinitionNotFound(name.to_string()))
    }

    /// Enumerate registered definitions, optionally filtered by name prefix
    /// and/or suffix.
    ///
    /// Each call re-enumerates from current state; results are name-sorted.
    pub fn list_definitions(
        &self,
        prefix: Option<&str>,
        suffix: Option<&str>,
    ) -> Vec<(String, Arc<JobDefinition<T>>)> {
        let definitions = self.definitions.read();
        let mut entries: Vec<(String, Arc<JobDefinition<T>>)> = definitions
            .iter()
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)))
            .filter(|(name, _)| suffix.is_none_or(|s| name.ends_with(s)))
            .map(|(name, def)| (name.clone(), Arc::clone(def)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Remove a definition by name.
    ///
    /// Fails with [`RegistryError::DefinitionInUse`] while any non-terminal
    /// instance still references it.
    pub fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut definitions = self.definitions.write();
        if !definitions.contains_key(name) {
            return Err(RegistryError::DefinitionNotFound(name.to_string()));
        }

        let live = {
            let instances = self.instances.read();
            instances
                .values()
                .filter(|instance| {
                    instance.definition().name() == name && !instance.state().is_terminal()
                })
                .count()
        };
        if live > 0 {
            return Err(RegistryError::DefinitionInUse {
                name: name.to_string(),
                live,
            });
        }

        definitions.remove(name);
        Ok(())
    }

    /// Get the queue under `name`, creating it with `config` on first
    /// reference.
    pub fn queue(&self, name: &str, config: QueueConfig) -> Arc<Queue<T>> {
        let mut queues = self.queues.write();
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Queue::new(name, config))),
        )
    }

    /// Strict queue lookup; fails with [`RegistryError::QueueNotFound`].
    pub fn get_queue(&self, name: &str) -> Result<Arc<Queue<T>>, RegistryError> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::QueueNotFound(name.to_string()))
    }

    /// Close and remove a queue.
    pub fn delete_queue(&self, name: &str) -> Result<(), RegistryError> {
        let removed = self.queues.write().remove(name);
        match removed {
            Some(queue) => {
                queue.close();
                Ok(())
            }
            None => Err(RegistryError::QueueNotFound(name.to_string())),
        }
    }

    /// Statistics for every registered queue.
    pub fn queue_stats(&self) -> Vec<QueueStats> {
        let queues = self.queues.read();
        let mut stats: Vec<QueueStats> = queues.values().map(|queue| queue.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Track a newly created instance.
    pub fn insert_instance(&self, instance: Arc<JobInstance<T>>) {
        self.instances.write().insert(instance.id(), instance);
    }

    /// Look up an instance by id.
    pub fn instance(&self, id: InstanceId) -> Result<Arc<JobInstance<T>>, RegistryError> {
        self.instances
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::InstanceNotFound(id))
    }

    /// Enumerate instances as `(id, state)` pairs, optionally filtered by a
    /// prefix of the hyphenated id string. Id-sorted; re-enumerates current
    /// state on every call.
    pub fn list_instances(&self, prefix: Option<&str>) -> Vec<(InstanceId, JobState)> {
        let instances = self.instances.read();
        let mut entries: Vec<(InstanceId, JobState)> = instances
            .values()
            .filter(|instance| prefix.is_none_or(|p| instance.id().to_string().starts_with(p)))
            .map(|instance| (instance.id(), instance.state()))
            .collect();
        entries.sort_by_key(|(id, _)| id.0);
        entries
    }

    /// Remove a terminal instance from the registry.
    ///
    /// Fails with [`RegistryError::NotTerminal`] while the instance is still
    /// live.
    pub fn retire(&self, id: InstanceId) -> Result<Arc<JobInstance<T>>, RegistryError> {
        let mut instances = self.instances.write();
        let instance = instances
            .get(&id)
            .cloned()
            .ok_or(RegistryError::InstanceNotFound(id))?;
        if !instance.state().is_terminal() {
            return Err(RegistryError::NotTerminal(id));
        }
        instances.remove(&id);
        Ok(instance)
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("definitions", &self.definitions.read().len())
            .field("queues", &self.queues.read().len())
            .field("instances", &self.instances.read().len())
            .finish()
    }
}
