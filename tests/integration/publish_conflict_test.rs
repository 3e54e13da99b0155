// tests/integration/publish_conflict_test.rs

//! Scenario: two clients mutate one property list from the same base
//! version; the slower publisher conflicts, resets, and succeeds.

use clusterlib::core::errors::ErrorKind;
use clusterlib::core::notifyable::{AccessType, HasPropertyLists};
use serde_json::json;

use crate::integration::fixtures;

#[tokio::test]
async fn property_list_publish_conflict_then_recovery() {
    let cluster = fixtures::cluster(2).await;
    let (_, app_a, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, app_b, _) = fixtures::app_and_group(&cluster.factories[1]).await;

    let pl_a = app_a
        .get_property_list("config", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let pl_b = app_b
        .get_property_list("config", AccessType::LoadFromRepository)
        .await
        .unwrap()
        .unwrap();
    let kv_a = pl_a.cached_key_values();
    let kv_b = pl_b.cached_key_values();

    // Both clients hold version 0 of the empty list.
    assert_eq!(kv_a.get("color").await.unwrap(), None);
    assert_eq!(kv_b.get("color").await.unwrap(), None);
    assert_eq!(kv_a.get_version().await, 0);

    // No yield between B's publish and A's publish, so A cannot observe
    // B's change before its own optimistic write is rejected.
    tokio::task::unconstrained(async {
        kv_b.set("color", json!("blue")).await.unwrap();
        assert_eq!(kv_b.publish(false).await.unwrap(), 1);

        kv_a.set("color", json!("red")).await.unwrap();
        let err = kv_a.publish(false).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PublishConflict { .. }));
    })
    .await;

    // Reset re-reads B's publish; the retry lands on top of it.
    kv_a.reset().await.unwrap();
    assert_eq!(kv_a.get("color").await.unwrap(), Some(json!("blue")));
    kv_a.set("color", json!("red")).await.unwrap();
    assert_eq!(kv_a.publish(false).await.unwrap(), 2);

    // Publish-then-reset reads back the same content.
    kv_a.reset().await.unwrap();
    assert_eq!(kv_a.get("color").await.unwrap(), Some(json!("red")));
    assert_eq!(kv_a.get_version().await, 2);

    cluster.shutdown().await;
}

#[tokio::test]
async fn unconditional_publish_overrides_stale_version() {
    let cluster = fixtures::cluster(2).await;
    let (_, app_a, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, app_b, _) = fixtures::app_and_group(&cluster.factories[1]).await;

    let kv_a = app_a
        .get_property_list("lww", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap()
        .cached_key_values();
    let kv_b = app_b
        .get_property_list("lww", AccessType::LoadFromRepository)
        .await
        .unwrap()
        .unwrap()
        .cached_key_values();

    tokio::task::unconstrained(async {
        kv_b.set("owner", json!("b")).await.unwrap();
        kv_b.publish(false).await.unwrap();

        // Last-writer-wins is an explicit opt-in.
        kv_a.set("owner", json!("a")).await.unwrap();
        assert_eq!(kv_a.publish(true).await.unwrap(), 2);
    })
    .await;

    kv_b.reset().await.unwrap();
    assert_eq!(kv_b.get("owner").await.unwrap(), Some(json!("a")));
    cluster.shutdown().await;
}
