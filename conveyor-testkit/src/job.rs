use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conveyor::{JobError, RunContext, RunFunction};

/// Doubles every input item.
#[derive(Clone, Copy, Debug, Default)]
pub struct Doubler;

#[async_trait]
impl RunFunction<i64> for Doubler {
    async fn run(&self, _ctx: &RunContext, input: Option<i64>) -> Result<Vec<i64>, JobError> {
        Ok(input.map(|item| vec![item * 2]).unwrap_or_default())
    }
}

/// Fails with retryable errors for the first `fail_first` invocations, then
/// echoes its input.
#[derive(Clone, Debug)]
pub struct FlakyRun {
    fail_first: u32,
    invocations: Arc<AtomicU32>,
}

impl FlakyRun {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Total invocation count so far.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunFunction<i64> for FlakyRun {
    async fn run(&self, _ctx: &RunContext, input: Option<i64>) -> Result<Vec<i64>, JobError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(JobError::retryable(format!("flaky attempt {attempt}")));
        }
        Ok(input.map(|item| vec![item]).unwrap_or_default())
    }
}

/// Fails on every invocation, counting attempts.
#[derive(Clone, Debug)]
pub struct AlwaysFails {
    permanent: bool,
    invocations: Arc<AtomicU32>,
}

impl AlwaysFails {
    /// Fails with retryable errors.
    pub fn retryable() -> Self {
        Self {
            permanent: false,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fails with a permanent error.
    pub fn permanent() -> Self {
        Self {
            permanent: true,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Total invocation count so far.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunFunction<i64> for AlwaysFails {
    async fn run(&self, _ctx: &RunContext, _input: Option<i64>) -> Result<Vec<i64>, JobError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if self.permanent {
            Err(JobError::permanent(format!("broken (attempt {attempt})")))
        } else {
            Err(JobError::retryable(format!("broken (attempt {attempt})")))
        }
    }
}

/// Sleeps for a fixed delay, then echoes its input.
#[derive(Clone, Copy, Debug)]
pub struct SleepyRun {
    delay_ms: u64,
}

impl SleepyRun {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

#[async_trait]
impl RunFunction<i64> for SleepyRun {
    async fn run(&self, _ctx: &RunContext, input: Option<i64>) -> Result<Vec<i64>, JobError> {
        tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        Ok(input.map(|item| vec![item]).unwrap_or_default())
    }
}

/// Source run function emitting a fixed batch of items.
///
/// Pair with `single_run` definitions to seed a pipeline.
#[derive(Clone, Debug)]
pub struct EmitOnce {
    items: Vec<i64>,
}

impl EmitOnce {
    pub fn new(items: Vec<i64>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl RunFunction<i64> for EmitOnce {
    async fn run(&self, _ctx: &RunContext, _input: Option<i64>) -> Result<Vec<i64>, JobError> {
        Ok(self.items.clone())
    }
}
