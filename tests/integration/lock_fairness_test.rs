// tests/integration/lock_fairness_test.rs

//! Scenario: strict FIFO fairness of the shared/exclusive lock protocol.
//! A shared bid queued behind an exclusive bid must not jump the queue.

use std::time::Duration;

use clusterlib::core::errors::ErrorKind;
use clusterlib::core::locks::{DistributedLockMode, LockName};
use clusterlib::core::notifyable::Notifyable;

use crate::integration::fixtures;

#[tokio::test]
async fn shared_bid_waits_behind_queued_exclusive() {
    let cluster = fixtures::cluster(4).await;
    let (_, _, g1) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, _, g2) = fixtures::app_and_group(&cluster.factories[1]).await;
    let (_, _, g3) = fixtures::app_and_group(&cluster.factories[2]).await;
    let (_, _, g4) = fixtures::app_and_group(&cluster.factories[3]).await;

    // C1 and C2 read concurrently.
    g1.acquire_lock(LockName::Notifyable, DistributedLockMode::Shared, -1)
        .await
        .unwrap();
    g2.acquire_lock(LockName::Notifyable, DistributedLockMode::Shared, -1)
        .await
        .unwrap();
    assert_eq!(
        g1.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Shared)
    );
    assert_eq!(
        g2.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Shared)
    );

    // C3 queues an exclusive bid behind both readers.
    let writer = {
        let g3 = g3.clone();
        tokio::spawn(async move {
            g3.acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(g3.has_lock(LockName::Notifyable), None);

    // C4's shared bid arrives after the exclusive bid and must wait even
    // though the lock is currently held shared.
    let late_reader = {
        let g4 = g4.clone();
        tokio::spawn(async move {
            g4.acquire_lock(LockName::Notifyable, DistributedLockMode::Shared, -1)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(g4.has_lock(LockName::Notifyable), None);

    // One reader releasing is not enough for the writer.
    g1.release_lock(LockName::Notifyable).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(g3.has_lock(LockName::Notifyable), None);

    // Both readers gone: the writer is granted, the late reader still waits.
    g2.release_lock(LockName::Notifyable).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .expect("writer granted")
        .unwrap()
        .unwrap();
    assert_eq!(
        g3.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Excl)
    );
    assert_eq!(g4.has_lock(LockName::Notifyable), None);

    // Writer done: the late reader finally proceeds.
    g3.release_lock(LockName::Notifyable).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), late_reader)
        .await
        .expect("late reader granted")
        .unwrap()
        .unwrap();
    assert_eq!(
        g4.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Shared)
    );

    g4.release_lock(LockName::Notifyable).await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test]
async fn nonblocking_acquire_fails_immediately_when_contended() {
    let cluster = fixtures::cluster(2).await;
    let (_, _, g1) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, _, g2) = fixtures::app_and_group(&cluster.factories[1]).await;

    g1.acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = g2
        .acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, 0)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::LockTimeout(0)));
    assert!(started.elapsed() < Duration::from_millis(500));

    // The failed bid was withdrawn; the owner is unaffected.
    let owner = g2.get_lock_owner(LockName::Notifyable).await.unwrap().unwrap();
    assert_eq!(owner.mode, DistributedLockMode::Excl);
    assert_eq!(
        g1.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Excl)
    );

    g1.release_lock(LockName::Notifyable).await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test]
async fn reentrant_acquire_is_refcounted() {
    let cluster = fixtures::single().await;
    let (_, _, group) = fixtures::app_and_group(&cluster.factories[0]).await;

    group
        .acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
        .await
        .unwrap();
    group
        .acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
        .await
        .unwrap();

    group.release_lock(LockName::Notifyable).await.unwrap();
    assert_eq!(
        group.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Excl)
    );
    group.release_lock(LockName::Notifyable).await.unwrap();
    assert_eq!(group.has_lock(LockName::Notifyable), None);

    // Releasing an unheld lock is an invalid method call.
    let err = group.release_lock(LockName::Notifyable).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidMethod(_)));

    cluster.shutdown().await;
}

#[tokio::test]
async fn recursive_lock_covers_the_subtree() {
    let cluster = fixtures::single().await;
    let (_, _, group) = fixtures::app_and_group(&cluster.factories[0]).await;
    let node = {
        use clusterlib::core::notifyable::{AccessType, HasNodes};
        group
            .get_node("locked", AccessType::CreateIfNotFound)
            .await
            .unwrap()
            .unwrap()
    };

    group
        .acquire_lock_recursive(LockName::Notifyable, DistributedLockMode::Excl, -1)
        .await
        .unwrap();
    assert_eq!(
        group.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Excl)
    );
    assert_eq!(
        node.has_lock(LockName::Notifyable),
        Some(DistributedLockMode::Excl)
    );

    group
        .release_lock_recursive(LockName::Notifyable)
        .await
        .unwrap();
    assert_eq!(group.has_lock(LockName::Notifyable), None);
    assert_eq!(node.has_lock(LockName::Notifyable), None);

    cluster.shutdown().await;
}

#[tokio::test]
async fn session_expiry_releases_lock_waiters() {
    let cluster = fixtures::cluster(2).await;
    let (_, _, g1) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, _, g2) = fixtures::app_and_group(&cluster.factories[1]).await;

    g1.acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
        .await
        .unwrap();
    let waiter = {
        let g2 = g2.clone();
        tokio::spawn(async move {
            g2.acquire_lock(LockName::Notifyable, DistributedLockMode::Excl, -1)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The waiter's own session dies; its wait surfaces a connection
    // failure rather than hanging.
    cluster.expire(1);
    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter released")
        .unwrap();
    let err = result.unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::RepositoryConnectionFailure(_)
    ));

    cluster.shutdown().await;
}
