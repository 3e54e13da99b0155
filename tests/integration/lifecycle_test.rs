// tests/integration/lifecycle_test.rs

//! Notifyable lifecycles: intern identity, idempotent creation, ancestor
//! navigation, key resolution, and removal rules.

use clusterlib::core::errors::ErrorKind;
use clusterlib::core::notifyable::{
    AccessType, HasApplications, HasGroups, HasNodes, Notifyable, NotifyableState,
};

use crate::integration::fixtures;

#[tokio::test]
async fn intern_table_returns_the_same_handle() {
    let cluster = fixtures::single().await;
    let factory = &cluster.factories[0];
    let (root, app, group) = fixtures::app_and_group(factory).await;

    // A second lookup, cached-only, yields the identical entity.
    let cached = root
        .get_application(fixtures::TEST_APP, AccessType::CachedOnly)
        .await
        .unwrap()
        .expect("interned");
    assert!(app.is_same(&cached));

    // Creating an entity whose paths all exist is a no-op.
    let again = root
        .get_application(fixtures::TEST_APP, AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    assert!(app.is_same(&again));

    // Navigation: parent and ancestor accessors agree with the keys.
    let parent = group.parent().await.unwrap().expect("group has a parent");
    assert_eq!(parent.key(), app.key());
    let my_app = group.my_application().await.unwrap().expect("enclosing app");
    assert!(my_app.is_same(&app));
    assert!(root.parent().await.unwrap().is_none());

    // Key resolution round-trips, including queue element paths.
    let resolved = factory
        .notifyable_from_key(group.key(), AccessType::LoadFromRepository)
        .await
        .unwrap()
        .expect("resolves");
    assert_eq!(resolved.key(), group.key());

    // A synchronize barrier drains the event pipeline without error.
    factory.synchronize().await.unwrap();
    assert!(factory.is_connected());

    cluster.shutdown().await;
    assert!(!factory.is_connected());
}

#[tokio::test]
async fn lookups_reject_invalid_names_and_missing_entities() {
    let cluster = fixtures::single().await;
    let root = cluster.factories[0].get_root().await.unwrap();

    let err = root
        .get_application("bad/name", AccessType::CreateIfNotFound)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArguments(_)));

    // Loading something that was never created yields an empty result.
    let missing = root
        .get_application("never-created", AccessType::LoadFromRepository)
        .await
        .unwrap();
    assert!(missing.is_none());
    let cached = root
        .get_application("never-created", AccessType::CachedOnly)
        .await
        .unwrap();
    assert!(cached.is_none());

    cluster.shutdown().await;
}

#[tokio::test]
async fn removal_respects_children_and_marks_handles() {
    let cluster = fixtures::single().await;
    let factory = &cluster.factories[0];
    let (_, app, group) = fixtures::app_and_group(factory).await;
    let node = group
        .get_node("n1", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();

    // Non-recursive removal with a live child fails without mutation.
    let err = group.remove(false).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArguments(_)));
    assert_eq!(group.get_state(), NotifyableState::Ready);
    assert_eq!(
        app.group_names().await.unwrap(),
        vec![fixtures::TEST_GROUP.to_string()]
    );

    // Recursive removal deletes leafwards and poisons the handles.
    group.remove(true).await.unwrap();
    assert_eq!(group.get_state(), NotifyableState::Removed);
    assert_eq!(node.get_state(), NotifyableState::Removed);
    assert!(app.group_names().await.unwrap().is_empty());

    let err = group.group_names().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ObjectRemoved(_)));
    let err = node.remove(false).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ObjectRemoved(_)));

    // The repository no longer resolves the key.
    let resolved = factory
        .notifyable_from_key(group.key(), AccessType::LoadFromRepository)
        .await
        .unwrap();
    assert!(resolved.is_none());

    // The root itself can never be removed.
    let root = factory.get_root().await.unwrap();
    let err = root.remove(true).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidMethod(_)));

    cluster.shutdown().await;
}

#[tokio::test]
async fn removed_state_keeps_last_cached_snapshot_readable() {
    let cluster = fixtures::single().await;
    let (_, _, group) = fixtures::app_and_group(&cluster.factories[0]).await;

    let state = group.cached_current_state();
    state.set("phase", serde_json::json!("serving")).unwrap();
    state.publish(false).await.unwrap();

    group.remove(true).await.unwrap();

    // Mutations fail, reads serve the snapshot.
    let err = state.set("phase", serde_json::json!("x")).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ObjectRemoved(_)));
    assert_eq!(
        state.get("phase").await.unwrap(),
        Some(serde_json::json!("serving"))
    );

    cluster.shutdown().await;
}
