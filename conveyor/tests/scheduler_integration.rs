//! Integration tests for the conveyor dispatch engine.
//!
//! Exercises the full register -> instantiate -> feed -> observe cycle:
//! replication modes, retry bounds, suspension, and lifecycle events.

use std::collections::BTreeMap;
use std::time::Duration;

use conveyor::{
    shard_key_fn, InstanceEventPayload, InstanceSpec, JobDefinition, JobState, Orchestrator,
    QueueConfig, ReplicationMode, RetryPolicy,
};
use conveyor_testkit::{
    wait_until, AlwaysFails, Doubler, EmitOnce, EventRecorder, FlakyRun, RecordingRun,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn doubling_api() -> Orchestrator<i64> {
    let api = Orchestrator::new();
    api.register_definition(JobDefinition::builder("double", Doubler).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());
    api
}

#[tokio::test]
async fn test_double_pipeline_processes_in_order() {
    let api = doubling_api();
    let id = api
        .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    let input = api.queue("in").unwrap();
    let output = api.queue("out").unwrap();

    input.put(5).await.unwrap();
    let first = timeout(WAIT, output.get()).await.unwrap().unwrap();
    assert_eq!(first, 10);

    input.put(3).await.unwrap();
    let second = timeout(WAIT, output.get()).await.unwrap().unwrap();
    assert_eq!(second, 6);

    assert_eq!(api.instance_state(id).unwrap(), JobState::Running);
    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_round_robin_alternates_by_arrival_order() {
    let api = Orchestrator::new();
    let recorder = RecordingRun::new();
    api.register_definition(JobDefinition::builder("record", recorder.clone()).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());

    // Items are buffered before the instance exists so routing order is
    // exactly arrival order.
    let input = api.queue("in").unwrap();
    input.put_many(vec![1, 2, 3, 4]).await.unwrap();

    api.create_instance(
        InstanceSpec::new("record")
            .with_input("in")
            .with_output("out")
            .with_replicas(2)
            .with_mode(ReplicationMode::RoundRobin),
    )
    .await
    .unwrap();

    assert!(wait_until(WAIT, || recorder.total() == 4).await);

    let expected: BTreeMap<usize, Vec<i64>> =
        BTreeMap::from([(0, vec![1, 3]), (1, vec![2, 4])]);
    assert_eq!(recorder.by_replica(), expected);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_duplicates_to_every_replica() {
    let api = Orchestrator::new();
    let recorder = RecordingRun::new();
    api.register_definition(JobDefinition::builder("record", recorder.clone()).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());

    let input = api.queue("in").unwrap();
    input.put_many(vec![1, 2, 3]).await.unwrap();

    api.create_instance(
        InstanceSpec::new("record")
            .with_input("in")
            .with_replicas(2)
            .with_mode(ReplicationMode::Broadcast),
    )
    .await
    .unwrap();

    assert!(wait_until(WAIT, || recorder.total() == 6).await);

    let by_replica = recorder.by_replica();
    assert_eq!(by_replica.get(&0), Some(&vec![1, 2, 3]));
    assert_eq!(by_replica.get(&1), Some(&vec![1, 2, 3]));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sharded_routes_equal_keys_to_same_replica() {
    let api = Orchestrator::new();
    let recorder = RecordingRun::new();
    api.register_definition(JobDefinition::builder("record", recorder.clone()).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());

    let input = api.queue("in").unwrap();
    input.put_many(vec![1, 2, 3, 4, 5, 6]).await.unwrap();

    api.create_instance(
        InstanceSpec::new("record")
            .with_input("in")
            .with_replicas(2)
            .with_mode(ReplicationMode::Sharded)
            .with_shard_key(shard_key_fn(|item: &i64| *item as u64)),
    )
    .await
    .unwrap();

    assert!(wait_until(WAIT, || recorder.total() == 6).await);

    // key % 2 routes evens to replica 0, odds to replica 1.
    let expected: BTreeMap<usize, Vec<i64>> =
        BTreeMap::from([(0, vec![2, 4, 6]), (1, vec![1, 3, 5])]);
    assert_eq!(recorder.by_replica(), expected);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_bound_is_max_retries_plus_one() {
    let api = Orchestrator::new();
    let failing = AlwaysFails::retryable();
    api.register_definition(
        JobDefinition::builder("breaks", failing.clone())
            .with_retry(RetryPolicy {
                max_retries: 2,
                base_delay_ms: 5,
                max_backoff_ms: 20,
            })
            .build(),
    )
    .unwrap();
    api.create_queue("in", QueueConfig::default());

    let id = api
        .create_instance(InstanceSpec::new("breaks").with_input("in"))
        .await
        .unwrap();

    api.queue("in").unwrap().put(1).await.unwrap();

    assert!(wait_until(WAIT, || {
        api.instance_state(id).unwrap() == JobState::Failed
    })
    .await);

    // max_retries = 2 -> exactly 3 total invocation attempts.
    assert_eq!(failing.invocations(), 3);

    let faults = api.instance_faults(id).unwrap();
    assert_eq!(faults.len(), 3);
    assert!(faults.iter().all(|fault| fault.retryable));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_error_fails_without_retries() {
    let api = Orchestrator::new();
    let failing = AlwaysFails::permanent();
    api.register_definition(
        JobDefinition::builder("broken", failing.clone())
            .with_retry(RetryPolicy::with_max_retries(5))
            .build(),
    )
    .unwrap();
    api.create_queue("in", QueueConfig::default());

    let id = api
        .create_instance(InstanceSpec::new("broken").with_input("in"))
        .await
        .unwrap();
    api.queue("in").unwrap().put(1).await.unwrap();

    assert!(wait_until(WAIT, || {
        api.instance_state(id).unwrap() == JobState::Failed
    })
    .await);

    // The retry policy never applies to permanent failures.
    assert_eq!(failing.invocations(), 1);
    let faults = api.instance_faults(id).unwrap();
    assert_eq!(faults.len(), 1);
    assert!(!faults[0].retryable);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flaky_run_recovers_within_retry_budget() {
    let api = Orchestrator::new();
    let flaky = FlakyRun::new(2);
    api.register_definition(
        JobDefinition::builder("flaky", flaky.clone())
            .with_retry(RetryPolicy {
                max_retries: 3,
                base_delay_ms: 5,
                max_backoff_ms: 20,
            })
            .build(),
    )
    .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());

    let id = api
        .create_instance(InstanceSpec::new("flaky").with_input("in").with_output("out"))
        .await
        .unwrap();

    api.queue("in").unwrap().put(42).await.unwrap();
    let output = api.queue("out").unwrap();
    let item = timeout(WAIT, output.get()).await.unwrap().unwrap();

    assert_eq!(item, 42);
    assert_eq!(flaky.invocations(), 3);
    assert_eq!(api.instance_state(id).unwrap(), JobState::Running);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_run_source_emits_and_completes() {
    let api = Orchestrator::new();
    api.register_definition(
        JobDefinition::builder("seed", EmitOnce::new(vec![7, 8, 9]))
            .single_run()
            .build(),
    )
    .unwrap();
    api.create_queue("out", QueueConfig::default());

    let id = api
        .create_instance(InstanceSpec::new("seed").with_output("out"))
        .await
        .unwrap();

    let output = api.queue("out").unwrap();
    let mut items = Vec::new();
    for _ in 0..3 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }
    assert_eq!(items, vec![7, 8, 9]);

    assert!(wait_until(WAIT, || {
        api.instance_state(id).unwrap() == JobState::Completed
    })
    .await);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_suspension_holds_items_until_resume() {
    let api = doubling_api();
    let id = api
        .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    api.suspend_instance(id).await.unwrap();
    assert_eq!(api.instance_state(id).unwrap(), JobState::Suspended);

    let input = api.queue("in").unwrap();
    let output = api.queue("out").unwrap();
    input.put_many(vec![1, 2]).await.unwrap();

    // Nothing is consumed while suspended.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(input.len(), 2);
    assert!(output.is_empty());

    api.resume_instance(id).await.unwrap();
    let mut items = Vec::new();
    for _ in 0..2 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }
    assert_eq!(items, vec![2, 4]);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_input_close_drains_then_completes() {
    let api = doubling_api();
    let id = api
        .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    let input = api.queue("in").unwrap();
    input.put_many(vec![1, 2, 3]).await.unwrap();
    input.close();

    let output = api.queue("out").unwrap();
    let mut items = Vec::new();
    for _ in 0..3 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }
    assert_eq!(items, vec![2, 4, 6]);

    assert!(wait_until(WAIT, || {
        api.instance_state(id).unwrap() == JobState::Completed
    })
    .await);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let api = doubling_api();
    let recorder = EventRecorder::attach(api.subscribe_events());

    let id = api
        .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    let input = api.queue("in").unwrap();
    input.put(5).await.unwrap();
    input.close();

    assert!(wait_until(WAIT, || {
        recorder.count_matching(|event| {
            event.meta.instance_id == id
                && matches!(event.payload, InstanceEventPayload::Completed)
        }) == 1
    })
    .await);

    assert!(
        recorder.count_matching(
            |event| matches!(event.payload, InstanceEventPayload::Created { .. })
        ) >= 1
    );
    assert!(
        recorder.count_matching(
            |event| matches!(event.payload, InstanceEventPayload::Dispatched { .. })
        ) >= 1
    );
    assert!(
        recorder.count_matching(|event| matches!(
            event.payload,
            InstanceEventPayload::RunSucceeded { outputs: 1, .. }
        )) >= 1
    );

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_stage_pipeline_chains_queues() {
    let api = Orchestrator::new();
    api.register_definition(JobDefinition::builder("double", Doubler).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("mid", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());

    api.create_instance(InstanceSpec::new("double").with_input("in").with_output("mid"))
        .await
        .unwrap();
    api.create_instance(InstanceSpec::new("double").with_input("mid").with_output("out"))
        .await
        .unwrap();

    api.queue("in").unwrap().put(3).await.unwrap();
    let item = timeout(WAIT, api.queue("out").unwrap().get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item, 12);

    api.shutdown().await.unwrap();
}
