use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Marker bounds for budget workload keys.
///
/// The scheduler budgets by definition name (`String`), but any hashable key
/// works.
pub trait WorkloadKey: Clone + Eq + Hash + Send + Sync + 'static {}

impl<K: Clone + Eq + Hash + Send + Sync + 'static> WorkloadKey for K {}

/// A token representing acquired dispatch budget for a workload.
///
/// Returned by [`Budget::try_acquire`] / [`Budget::acquire`]; must be handed
/// back via [`Budget::release`] when the run finishes to return capacity to
/// the pool.
#[derive(Debug)]
pub struct BudgetToken<W> {
    /// The workload this token was acquired for.
    pub workload: W,
    /// Timestamp when the budget was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl<W> BudgetToken<W> {
    pub fn new(workload: W) -> Self {
        Self {
            workload,
            acquired_at: Utc::now(),
        }
    }
}

/// Per-workload concurrency limits.
#[derive(Debug, Clone)]
pub struct BudgetConfig<W> {
    limits: HashMap<W, usize>,
    default_limit: usize,
}

impl<W: WorkloadKey> BudgetConfig<W> {
    pub fn new(limits: HashMap<W, usize>, default_limit: usize) -> Self {
        Self {
            limits,
            default_limit: default_limit.max(1),
        }
    }

    /// Configuration with only a default limit.
    pub fn with_default(default_limit: usize) -> Self {
        Self::new(HashMap::new(), default_limit)
    }

    /// Add a limit for a specific workload.
    pub fn with_limit(mut self, workload: W, limit: usize) -> Self {
        self.limits.insert(workload, limit.max(1));
        self
    }

    /// Get the limit for a workload.
    pub fn limit(&self, workload: &W) -> usize {
        self.limits
            .get(workload)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl<W: WorkloadKey> Default for BudgetConfig<W> {
    fn default() -> Self {
        Self {
            limits: HashMap::new(),
            default_limit: 1,
        }
    }
}

/// Trait for managing dispatch budgets with backpressure.
#[async_trait]
pub trait Budget<W: WorkloadKey>: Send + Sync {
    /// Try to acquire a budget token. Returns `None` at capacity.
    async fn try_acquire(&self, workload: W) -> anyhow::Result<Option<Arc<BudgetToken<W>>>>;

    /// Acquire a budget token, waiting until capacity is available.
    async fn acquire(&self, workload: W) -> anyhow::Result<Arc<BudgetToken<W>>>;

    /// Release a budget token back to the pool.
    async fn release(&self, token: Arc<BudgetToken<W>>) -> anyhow::Result<()>;

    /// Current utilization for a workload as `(current, limit)`.
    async fn utilization(&self, workload: W) -> anyhow::Result<(usize, usize)>;

    /// Check availability without acquiring.
    async fn has_budget(&self, workload: W) -> anyhow::Result<bool>;
}

/// Default in-memory [`Budget`] tracking per-workload counts.
pub struct InMemoryBudget<W> {
    config: BudgetConfig<W>,
    counters: Arc<Mutex<HashMap<W, usize>>>,
}

impl<W: WorkloadKey> InMemoryBudget<W> {
    pub fn new(config: BudgetConfig<W>) -> Self {
        Self {
            config,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn current_count(&self, workload: &W) -> usize {
        let counters = self.counters.lock().await;
        counters.get(workload).copied().unwrap_or(0)
    }
}

impl<W: WorkloadKey> std::fmt::Debug for InMemoryBudget<W>
where
    W: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InMemoryBudget");
        match self.counters.try_lock() {
            Ok(counters) => {
                debug.field("counters", &*counters);
            }
            Err(_) => {
                debug.field("counters", &"<locked>");
            }
        }
        debug.finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: WorkloadKey> Budget<W> for InMemoryBudget<W> {
    async fn try_acquire(&self, workload: W) -> anyhow::Result<Option<Arc<BudgetToken<W>>>> {
        let limit = self.config.limit(&workload);
        let mut counters = self.counters.lock().await;
        let current = counters.get(&workload).copied().unwrap_or(0);

        if current < limit {
            *counters.entry(workload.clone()).or_insert(0) += 1;
            Ok(Some(Arc::new(BudgetToken::new(workload))))
        } else {
            Ok(None)
        }
    }

    async fn acquire(&self, workload: W) -> anyhow::Result<Arc<BudgetToken<W>>> {
        // Spin with a short sleep until capacity frees up.
        loop {
            if let Some(token) = self.try_acquire(workload.clone()).await? {
                return Ok(token);
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
        }
    }

    async fn release(&self, token: Arc<BudgetToken<W>>) -> anyhow::Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(count) = counters.get_mut(&token.workload) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    async fn utilization(&self, workload: W) -> anyhow::Result<(usize, usize)> {
        let limit = self.config.limit(&workload);
        let current = self.current_count(&workload).await;
        Ok((current, limit))
    }

    async fn has_budget(&self, workload: W) -> anyhow::Result<bool> {
        let (current, limit) = self.utilization(workload).await?;
        Ok(current < limit)
    }
}
