// tests/integration/events_test.rs

//! Event fan-out: cached-state changes reach registered handlers, timers
//! deliver through the dispatcher, and shutdown raises the end event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clusterlib::core::errors::Result;
use clusterlib::core::events::{
    EventMask, HandlerCondition, TimerEventHandler, UserEvent, UserEventHandler,
};
use clusterlib::core::notifyable::{AccessType, HasPropertyLists, Notifyable};
use clusterlib::core::timer::TimerId;
use serde_json::{Value, json};

use crate::integration::fixtures;

#[derive(Default)]
struct CountingHandler {
    seen: AtomicU32,
    last_mask: AtomicU32,
    cond: HandlerCondition,
}

#[async_trait]
impl UserEventHandler for CountingHandler {
    async fn handle_user_event(&self, event: &UserEvent) -> Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        self.last_mask.store(event.mask.bits(), Ordering::SeqCst);
        Ok(())
    }

    fn condition(&self) -> Option<&HandlerCondition> {
        Some(&self.cond)
    }
}

#[tokio::test]
async fn state_publish_notifies_matching_handler() {
    let cluster = fixtures::single().await;
    let factory = &cluster.factories[0];
    let (_, app, _) = fixtures::app_and_group(factory).await;

    let client = factory.create_client();
    let handler = Arc::new(CountingHandler::default());
    client.register_handler(
        app.key(),
        EventMask::CURRENT_STATE_CHANGE,
        handler.clone(),
    );

    let state = app.cached_current_state();
    state.set("status", json!("up")).unwrap();
    state.publish(false).await.unwrap();

    assert!(handler.cond.wait_until_condition(2000).await.unwrap());
    assert!(handler.seen.load(Ordering::SeqCst) >= 1);
    let mask = EventMask::from_bits_truncate(handler.last_mask.load(Ordering::SeqCst));
    assert!(mask.contains(EventMask::CURRENT_STATE_CHANGE));

    // A key-scoped handler for a different notifyable stays silent.
    let other = Arc::new(CountingHandler::default());
    client.register_handler(
        "/clusterlib/1.0/root",
        EventMask::CURRENT_STATE_CHANGE,
        other.clone(),
    );
    handler.cond.reset_condition();
    state.set("status", json!("up2")).unwrap();
    state.publish(false).await.unwrap();
    assert!(handler.cond.wait_until_condition(2000).await.unwrap());
    assert_eq!(other.seen.load(Ordering::SeqCst), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn property_list_values_event_reaches_other_sessions() {
    let cluster = fixtures::cluster(2).await;
    let (_, app_a, _) = fixtures::app_and_group(&cluster.factories[0]).await;
    let (_, app_b, _) = fixtures::app_and_group(&cluster.factories[1]).await;

    let pl_a = app_a
        .get_property_list("watched", AccessType::CreateIfNotFound)
        .await
        .unwrap()
        .unwrap();
    let pl_b = app_b
        .get_property_list("watched", AccessType::LoadFromRepository)
        .await
        .unwrap()
        .unwrap();

    let client_b = cluster.factories[1].create_client();
    let handler = Arc::new(CountingHandler::default());
    client_b.register_handler(
        pl_b.key(),
        EventMask::PROPERTY_LIST_VALUES_CHANGE,
        handler.clone(),
    );

    let kv_a = pl_a.cached_key_values();
    kv_a.set("threshold", json!(42)).await.unwrap();
    kv_a.publish(false).await.unwrap();

    assert!(handler.cond.wait_until_condition(2000).await.unwrap());

    // B's cache was refreshed by the watch before the handler ran.
    let kv_b = pl_b.cached_key_values();
    assert_eq!(kv_b.get("threshold").await.unwrap(), Some(json!(42)));

    cluster.shutdown().await;
}

struct OneShotTimer {
    fired: AtomicU32,
    cond: HandlerCondition,
}

#[async_trait]
impl TimerEventHandler for OneShotTimer {
    async fn handle_timer_event(&self, _id: TimerId, data: Value) -> Result<()> {
        assert_eq!(data, json!("tick"));
        self.fired.fetch_add(1, Ordering::SeqCst);
        self.cond.signal();
        Ok(())
    }
}

#[tokio::test]
async fn timers_deliver_and_cancel_through_the_client() {
    let cluster = fixtures::single().await;
    let client = cluster.factories[0].create_client();

    let timer = Arc::new(OneShotTimer {
        fired: AtomicU32::new(0),
        cond: HandlerCondition::new(),
    });
    client.register_timer(10, json!("tick"), timer.clone());
    assert!(timer.cond.wait_until_condition(2000).await.unwrap());
    assert_eq!(timer.fired.load(Ordering::SeqCst), 1);

    // A cancelled timer never fires.
    let cancelled = Arc::new(OneShotTimer {
        fired: AtomicU32::new(0),
        cond: HandlerCondition::new(),
    });
    let id = client.register_timer(100, json!("tick"), cancelled.clone());
    assert!(client.cancel_timer(id));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cancelled.fired.load(Ordering::SeqCst), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn shutdown_raises_the_end_event() {
    let cluster = fixtures::single().await;
    let client = cluster.factories[0].create_client();

    let handler = Arc::new(CountingHandler::default());
    client.register_handler("", EventMask::END_EVENT, handler.clone());

    cluster.factories[0].shutdown().await.unwrap();
    assert!(handler.cond.wait_until_condition(2000).await.unwrap());
    let mask = EventMask::from_bits_truncate(handler.last_mask.load(Ordering::SeqCst));
    assert!(mask.contains(EventMask::END_EVENT));
}
