// tests/integration/leader_failover_test.rs

//! Scenario: three clients bid for leadership of one group; the leader's
//! session expires and the next bidder is promoted in FIFO order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clusterlib::core::errors::Result;
use clusterlib::core::events::{EventMask, HandlerCondition, UserEvent, UserEventHandler};
use clusterlib::core::notifyable::Notifyable;

use crate::integration::fixtures;

#[derive(Default)]
struct LeadershipWatcher {
    fired: AtomicU32,
    cond: HandlerCondition,
}

#[async_trait]
impl UserEventHandler for LeadershipWatcher {
    async fn handle_user_event(&self, _event: &UserEvent) -> Result<()> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn condition(&self) -> Option<&HandlerCondition> {
        Some(&self.cond)
    }
}

#[tokio::test]
async fn leader_failover_promotes_next_bidder() {
    let cluster = fixtures::cluster(3).await;
    let (_, _, g1) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, _, g2) = fixtures::app_and_group(&cluster.factories[1]).await;
    let (_, _, g3) = fixtures::app_and_group(&cluster.factories[2]).await;

    // C1 leads.
    assert!(g1.try_to_become_leader(-1).await.unwrap());
    assert!(g1.am_i_the_leader());

    // C2 then C3 queue their bids in order.
    let bid2 = {
        let g2 = g2.clone();
        tokio::spawn(async move { g2.try_to_become_leader(-1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let bid3 = {
        let g3 = g3.clone();
        tokio::spawn(async move { g3.try_to_become_leader(-1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!g2.am_i_the_leader());
    assert!(!g3.am_i_the_leader());

    // C3 observes leadership changes from here on.
    let client3 = cluster.factories[2].create_client();
    let watcher = Arc::new(LeadershipWatcher::default());
    client3.register_handler(g3.key(), EventMask::LEADERSHIP_CHANGE, watcher.clone());

    // The leader's session expires; its ephemeral bid vanishes.
    cluster.expire(0);

    let promoted = tokio::time::timeout(Duration::from_secs(5), bid2)
        .await
        .expect("C2 is promoted in time")
        .unwrap()
        .unwrap();
    assert!(promoted);
    assert!(g2.am_i_the_leader());
    assert!(!g3.am_i_the_leader());

    // Exactly one leadership-change event reached C3.
    assert!(watcher.cond.wait_until_condition(2000).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(watcher.fired.load(Ordering::SeqCst), 1);

    let leader = g3.get_leader_id().await.unwrap();
    assert!(leader.is_some());

    bid3.abort();
    cluster.shutdown().await;
}
