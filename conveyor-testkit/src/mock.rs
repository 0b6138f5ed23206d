use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conveyor::{InstanceEvent, JobError, RunContext, RunFunction};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Echoing run function that records which replica processed which items.
#[derive(Clone, Default)]
pub struct RecordingRun {
    seen: Arc<Mutex<BTreeMap<usize, Vec<i64>>>>,
}

impl RecordingRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items seen so far, keyed by replica index.
    pub fn by_replica(&self) -> BTreeMap<usize, Vec<i64>> {
        self.seen.lock().clone()
    }

    /// All items seen so far, sorted.
    pub fn all_items(&self) -> Vec<i64> {
        let mut items: Vec<i64> = self.seen.lock().values().flatten().copied().collect();
        items.sort_unstable();
        items
    }

    /// Total number of items seen.
    pub fn total(&self) -> usize {
        self.seen.lock().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

#[async_trait]
impl RunFunction<i64> for RecordingRun {
    async fn run(&self, ctx: &RunContext, input: Option<i64>) -> Result<Vec<i64>, JobError> {
        match input {
            Some(item) => {
                self.seen.lock().entry(ctx.replica).or_default().push(item);
                Ok(vec![item])
            }
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for RecordingRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRun")
            .field("total", &self.total())
            .finish()
    }
}

/// Collects instance events from a broadcast receiver on a background task.
#[derive(Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<InstanceEvent>>>,
}

impl EventRecorder {
    /// Start recording from the given receiver.
    pub fn attach(mut receiver: broadcast::Receiver<InstanceEvent>) -> Self {
        let events: Arc<Mutex<Vec<InstanceEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => sink.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { events }
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<InstanceEvent> {
        self.events.lock().clone()
    }

    /// Count of recorded events matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&InstanceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("recorded", &self.events.lock().len())
            .finish()
    }
}
