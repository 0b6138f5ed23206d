//! Basic pipeline example.
//!
//! Registers a doubling job, wires it between two named queues with two
//! round-robin replicas, feeds items through, and watches lifecycle events.

use conveyor::{
    InstanceSpec, JobDefinition, JobState, Orchestrator, QueueConfig, ReplicationMode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== Conveyor Pipeline Basic Example ===\n");

    let api = Orchestrator::new();

    // 1. Register the job definition.
    api.register_definition(JobDefinition::from_fn("double", |x: i64| x * 2))?;
    println!("1. Registered definition `double`");

    // 2. Create the queues.
    api.create_queue("in", QueueConfig::default());
    api.create_queue("out", QueueConfig::bounded(64));
    println!("2. Created queues `in` and `out`");

    // 3. Bind an instance with two replicas.
    let mut events = api.subscribe_events();
    let id = api
        .create_instance(
            InstanceSpec::new("double")
                .with_input("in")
                .with_output("out")
                .with_replicas(2)
                .with_mode(ReplicationMode::RoundRobin),
        )
        .await?;
    println!("3. Created instance {id} (2 replicas, round-robin)\n");

    // 4. Feed items and drain the results.
    let input = api.queue("in")?;
    let output = api.queue("out")?;
    input.put_many(1..=10).await?;
    input.close();

    let mut results = Vec::new();
    for _ in 0..10 {
        results.push(output.get().await?);
    }
    results.sort_unstable();
    println!("4. Results: {results:?}");

    // 5. The instance completes once its input is drained.
    while api.instance_state(id)? != JobState::Completed {
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    }
    println!("5. Instance state: {}", api.instance_state(id)?);

    println!("\n6. Events observed:");
    while let Ok(event) = events.try_recv() {
        println!("   {:?}", event.payload);
    }

    for stats in api.queue_stats() {
        println!(
            "   queue `{}`: enqueued={} dequeued={} depth={}",
            stats.name, stats.enqueued, stats.dequeued, stats.depth
        );
    }

    api.shutdown().await?;
    println!("\n=== Example Complete ===");
    Ok(())
}
