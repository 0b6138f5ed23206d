//! Stress tests: item conservation and ordering under replicated,
//! multi-stage, multi-producer load.

use std::time::Duration;

use conveyor::{
    InstanceSpec, JobDefinition, JobState, Orchestrator, QueueConfig, ReplicationMode,
    SchedulerConfig,
};
use conveyor_testkit::{wait_until, Doubler, RecordingRun};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_round_robin_splits_load_exactly() {
    let api = Orchestrator::new();
    let recorder = RecordingRun::new();
    api.register_definition(JobDefinition::builder("record", recorder.clone()).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());

    let input = api.queue("in").unwrap();
    input.put_many(0..300).await.unwrap();

    api.create_instance(
        InstanceSpec::new("record")
            .with_input("in")
            .with_replicas(3)
            .with_mode(ReplicationMode::RoundRobin),
    )
    .await
    .unwrap();

    assert!(wait_until(WAIT, || recorder.total() == 300).await);

    // Every item seen exactly once, and the rotation splits evenly.
    let all: Vec<i64> = recorder.all_items();
    assert_eq!(all, (0..300).collect::<Vec<i64>>());
    for (_, items) in recorder.by_replica() {
        assert_eq!(items.len(), 100);
    }

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_stage_replicated_pipeline_conserves_items() {
    let api = Orchestrator::<i64>::builder()
        .with_scheduler_config(SchedulerConfig {
            max_concurrent: 16,
            ..SchedulerConfig::default()
        })
        .build();
    api.register_definition(JobDefinition::builder("double", Doubler).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("mid", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());

    api.create_instance(
        InstanceSpec::new("double")
            .with_input("in")
            .with_output("mid")
            .with_replicas(2),
    )
    .await
    .unwrap();
    api.create_instance(
        InstanceSpec::new("double")
            .with_input("mid")
            .with_output("out")
            .with_replicas(2),
    )
    .await
    .unwrap();

    let input = api.queue("in").unwrap();
    input.put_many(0..200).await.unwrap();

    let output = api.queue("out").unwrap();
    let mut items = Vec::with_capacity(200);
    for _ in 0..200 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }

    // Cross-replica ordering is unspecified; the multiset must match.
    items.sort_unstable();
    let expected: Vec<i64> = (0..200).map(|value| value * 4).collect();
    assert_eq!(items, expected);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_producers_are_all_drained() {
    let api = Orchestrator::new();
    api.register_definition(JobDefinition::builder("double", Doubler).build())
        .unwrap();
    api.create_queue("in", QueueConfig::default());
    api.create_queue("out", QueueConfig::default());

    let id = api
        .create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    let mut producers = Vec::new();
    for base in 0..4i64 {
        let input = api.queue("in").unwrap();
        producers.push(tokio::spawn(async move {
            for offset in 0..50 {
                input.put(base * 50 + offset).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    api.queue("in").unwrap().close();

    let output = api.queue("out").unwrap();
    let mut items = Vec::with_capacity(200);
    for _ in 0..200 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }
    items.sort_unstable();
    let expected: Vec<i64> = (0..200).map(|value| value * 2).collect();
    assert_eq!(items, expected);

    assert!(wait_until(WAIT, || {
        api.instance_state(id).unwrap() == JobState::Completed
    })
    .await);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bounded_queue_backpressure_under_load() {
    let api = Orchestrator::new();
    api.register_definition(JobDefinition::builder("double", Doubler).build())
        .unwrap();
    api.create_queue("in", QueueConfig::bounded(4));
    api.create_queue("out", QueueConfig::bounded(4));

    api.create_instance(InstanceSpec::new("double").with_input("in").with_output("out"))
        .await
        .unwrap();

    let input = api.queue("in").unwrap();
    let output = api.queue("out").unwrap();

    // The producer outruns the tiny buffers and is throttled, never dropped.
    let producer = tokio::spawn(async move {
        for value in 0..100i64 {
            input.put(value).await.unwrap();
        }
    });

    let mut items = Vec::with_capacity(100);
    for _ in 0..100 {
        items.push(timeout(WAIT, output.get()).await.unwrap().unwrap());
    }
    producer.await.unwrap();

    let expected: Vec<i64> = (0..100).map(|value| value * 2).collect();
    assert_eq!(items, expected);

    api.shutdown().await.unwrap();
}
