//! Standalone queue example: FIFO hand-off, backpressure, and close
//! semantics without the scheduler.

use std::sync::Arc;

use conveyor::{PutMode, Queue, QueueConfig, QueueError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Conveyor Simple Queue Example ===\n");

    // Bounded queue with blocking backpressure.
    let queue = Arc::new(Queue::new("work", QueueConfig::bounded(4)));

    let producer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            for value in 0..12i64 {
                queue.put(value).await?;
                println!("[producer] put {value}");
            }
            queue.close();
            println!("[producer] closed the queue");
            anyhow::Ok(())
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut total = 0i64;
            loop {
                match queue.get().await {
                    Ok(value) => {
                        total += value;
                        println!("[consumer] got {value}");
                        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                    }
                    Err(QueueError::Closed(_)) => break,
                    Err(err) => anyhow::bail!("unexpected queue error: {err}"),
                }
            }
            Ok(total)
        })
    };

    producer.await??;
    let total = consumer.await??;
    println!("\nDrained after close; total = {total}");

    // Fail-fast puts never block.
    let strict = Queue::new(
        "strict",
        QueueConfig::bounded(2).with_put_mode(PutMode::Fail),
    );
    strict.put(1).await?;
    strict.put(2).await?;
    match strict.put(3).await {
        Err(QueueError::Full(name)) => println!("queue `{name}` rejected the overflow put"),
        other => println!("unexpected result: {other:?}"),
    }

    let stats = strict.stats();
    println!(
        "stats for `{}`: depth={} enqueued={}",
        stats.name, stats.depth, stats.enqueued
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
