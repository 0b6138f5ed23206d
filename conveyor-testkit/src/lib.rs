//! Shared test fixtures for the conveyor orchestration core.
//!
//! Run-function fakes with observable counters plus an event recorder, used
//! by conveyor's integration tests and examples.

pub mod job;
pub mod mock;

pub use job::{AlwaysFails, Doubler, EmitOnce, FlakyRun, SleepyRun};
pub use mock::{EventRecorder, RecordingRun};

use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `deadline` elapses.
///
/// Returns whether the condition was observed in time.
pub async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
