// tests/integration/queue_fifo_test.rs

//! Scenario: concurrent producers and consumers drain a durable queue with
//! exactly-once delivery and per-producer FIFO order.

use std::sync::Arc;
use std::time::Duration;

use clusterlib::core::notifyable::{AccessType, HasQueues};
use parking_lot::Mutex;

use crate::integration::fixtures;

const PRODUCERS: usize = 10;
const PER_PRODUCER: usize = 100;

#[tokio::test]
async fn concurrent_producers_and_consumers_deliver_exactly_once() {
    let cluster = fixtures::single().await;
    let (_, app, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let queue = app
        .get_queue("work", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = queue.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                queue.put(&format!("p{producer:02}-{i:03}")).await.unwrap();
            }
        }));
    }

    let delivered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut consumers = Vec::new();
    for _ in 0..PRODUCERS {
        let queue = queue.clone();
        let delivered = delivered.clone();
        consumers.push(tokio::spawn(async move {
            loop {
                match queue.take_wait_msecs(500).await.unwrap() {
                    Some(element) => delivered.lock().push(element),
                    None => return,
                }
            }
        }));
    }

    for producer in producers {
        producer.await.unwrap();
    }
    for consumer in consumers {
        tokio::time::timeout(Duration::from_secs(30), consumer)
            .await
            .expect("consumer drains in time")
            .unwrap();
    }

    let delivered = delivered.lock();
    assert_eq!(delivered.len(), PRODUCERS * PER_PRODUCER);

    // Exactly once: no duplicates.
    let mut sorted = delivered.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), PRODUCERS * PER_PRODUCER);

    // Per-producer FIFO: each producer's elements appear in produced order.
    for producer in 0..PRODUCERS {
        let prefix = format!("p{producer:02}-");
        let of_producer: Vec<&String> = delivered
            .iter()
            .filter(|e| e.starts_with(&prefix))
            .collect();
        assert_eq!(of_producer.len(), PER_PRODUCER);
        for (i, element) in of_producer.iter().enumerate() {
            assert_eq!(**element, format!("{prefix}{i:03}"));
        }
    }

    assert!(queue.is_empty().await.unwrap());
    cluster.shutdown().await;
}

#[tokio::test]
async fn queue_basic_semantics() {
    let cluster = fixtures::single().await;
    let (_, app, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let queue = app
        .get_queue("basics", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();

    // A negative timeout reports empty immediately.
    let started = std::time::Instant::now();
    assert_eq!(queue.take_wait_msecs(-1).await.unwrap(), None);
    assert!(started.elapsed() < Duration::from_millis(100));

    let first = queue.put("first").await.unwrap();
    let second = queue.put("second").await.unwrap();
    assert!(first < second);
    assert_eq!(queue.size().await.unwrap(), 2);
    assert_eq!(queue.front().await.unwrap(), Some("first".to_string()));
    assert_eq!(queue.size().await.unwrap(), 2);

    // Lowest outstanding id is delivered first.
    assert_eq!(
        queue.take_wait_msecs(-1).await.unwrap(),
        Some("first".to_string())
    );

    let third = queue.put("third").await.unwrap();
    let all = queue.get_all_elements().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[&second], "second");
    assert_eq!(all[&third], "third");

    assert!(queue.remove_element(second).await.unwrap());
    assert!(!queue.remove_element(second).await.unwrap());
    queue.clear().await.unwrap();
    assert!(queue.is_empty().await.unwrap());

    // A blocked take is woken by a later put.
    let taker = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.take_wait_msecs(5000).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.put("late").await.unwrap();
    let taken = tokio::time::timeout(Duration::from_secs(5), taker)
        .await
        .expect("taker woken")
        .unwrap()
        .unwrap();
    assert_eq!(taken, Some("late".to_string()));

    // Oversized payloads are rejected at the boundary.
    let oversized = "x".repeat(1024 * 1024 + 1);
    assert!(queue.put(&oversized).await.is_err());

    cluster.shutdown().await;
}
