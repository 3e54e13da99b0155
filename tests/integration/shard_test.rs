// tests/integration/shard_test.rs

//! Scenario: shard queries return covering entries by priority, coverage
//! detection, and shard-table publish round-trips.

use clusterlib::core::hashrange::HashRange;
use clusterlib::core::notifyable::{AccessType, HasDataDistributions};

use crate::integration::fixtures;

#[tokio::test]
async fn shard_queries_order_by_priority() {
    let cluster = fixtures::single().await;
    let (_, app, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let dist = app
        .get_data_distribution("keyspace", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let shards = dist.cached_shards();

    shards
        .insert(HashRange::Uint64(0), HashRange::Uint64(99), "X", 1)
        .await
        .unwrap();
    shards
        .insert(HashRange::Uint64(50), HashRange::Uint64(149), "Y", 5)
        .await
        .unwrap();

    // Both shards cover 75; the higher priority lists first.
    let hits = shards
        .get_notifyable_keys(&HashRange::Uint64(75))
        .await
        .unwrap();
    assert_eq!(hits, vec!["Y".to_string(), "X".to_string()]);

    // Only X covers 10; nothing covers 150.
    assert_eq!(
        shards.get_notifyable_keys(&HashRange::Uint64(10)).await.unwrap(),
        vec!["X".to_string()]
    );
    assert!(
        shards
            .get_notifyable_keys(&HashRange::Uint64(150))
            .await
            .unwrap()
            .is_empty()
    );

    // The 64-bit span is not yet covered.
    assert!(!shards.is_covered().await.unwrap());

    // Closing [100, MAX] completes coverage (MAX inclusive, no wrap).
    shards
        .insert(HashRange::Uint64(100), HashRange::end(), "Z", 0)
        .await
        .unwrap();
    assert!(shards.is_covered().await.unwrap());

    cluster.shutdown().await;
}

#[tokio::test]
async fn shard_table_publish_round_trip_preserves_order() {
    let cluster = fixtures::single().await;
    let (_, app, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let shards = app
        .get_data_distribution("routing", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap()
        .cached_shards();

    shards
        .insert(HashRange::Uint64(0), HashRange::Uint64(99), "X", 3)
        .await
        .unwrap();
    shards
        .insert(HashRange::Uint64(0), HashRange::Uint64(99), "Y", 3)
        .await
        .unwrap();
    shards
        .insert(HashRange::Uint64(200), HashRange::Uint64(299), "Z", 7)
        .await
        .unwrap();
    let version = shards.publish(false).await.unwrap();
    assert_eq!(version, 1);

    shards.reset().await.unwrap();
    assert_eq!(shards.get_count().await.unwrap(), 3);

    // Equal priorities keep their insertion order across the round trip.
    let hits = shards
        .get_notifyable_keys(&HashRange::Uint64(50))
        .await
        .unwrap();
    assert_eq!(hits, vec!["X".to_string(), "Y".to_string()]);

    let all = shards.get_all_shards(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
    let only_z = shards.get_all_shards(Some("Z"), None).await.unwrap();
    assert_eq!(only_z.len(), 1);
    assert_eq!(only_z[0].priority, 7);

    // Removal requires an exact match.
    let wrong_priority = clusterlib::core::cached::Shard {
        priority: 6,
        ..only_z[0].clone()
    };
    assert!(!shards.remove(&wrong_priority).await.unwrap());
    assert!(shards.remove(&only_z[0]).await.unwrap());
    assert_eq!(shards.get_count().await.unwrap(), 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn split_hash_range_is_contiguous() {
    let cluster = fixtures::single().await;
    let (_, app, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let shards = app
        .get_data_distribution("split", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap()
        .cached_shards();

    let ranges = shards.split_hash_range(4).unwrap();
    assert_eq!(ranges.len(), 4);
    assert!(ranges[0].0.is_begin());
    assert!(ranges[3].1.is_end());
    for window in ranges.windows(2) {
        let hi = window[0].1.as_u64().unwrap();
        let next_lo = window[1].0.as_u64().unwrap();
        assert_eq!(hi + 1, next_lo);
    }
    assert!(shards.split_hash_range(0).is_err());

    cluster.shutdown().await;
}
