// src/core/events.rs

//! The user-facing event vocabulary: event masks, user/timer event handler
//! traits, and the per-handler wait condition.
//!
//! Store watch fires are normalised by the factory's event loop into
//! [`UserEvent`]s; each client's dispatcher task delivers them one at a time
//! to every handler whose `(notifyable key, mask)` registration matches.

use async_trait::async_trait;
use bitflags::bitflags;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::errors::{ClusterlibError, Result};
use crate::core::timer::TimerId;

bitflags! {
    /// Event notification mask.  Bit positions are part of the wire-level
    /// contract and must not be renumbered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// Notifyable was created.
        const CREATED = 1 << 0;
        /// Notifyable was deleted.
        const DELETED = 1 << 1;
        /// Notifyable current state has changed.
        const CURRENT_STATE_CHANGE = 1 << 2;
        /// Groups in this notifyable changed.
        const GROUPS_CHANGE = 1 << 3;
        /// Data distributions in this notifyable changed.
        const DISTRIBUTIONS_CHANGE = 1 << 4;
        /// Nodes in this notifyable changed.
        const NODES_CHANGE = 1 << 5;
        /// Leadership of this notifyable changed.
        const LEADERSHIP_CHANGE = 1 << 6;
        /// This node's client state changed.
        const CLIENT_STATE_CHANGE = 1 << 7;
        /// This node's process slot info changed.
        const PROCESS_SLOT_INFO_CHANGE = 1 << 8;
        /// This node's master set state changed.
        const MASTER_STATE_CHANGE = 1 << 9;
        /// Process slots in this notifyable changed.
        const PROCESS_SLOTS_CHANGE = 1 << 11;
        /// This process slot's process info changed.
        const PROCESS_SLOT_PROCESS_INFO_CHANGE = 1 << 12;
        /// Shards in this data distribution changed.
        const SHARDS_CHANGE = 1 << 19;
        /// Property lists in this notifyable changed.
        const PROPERTY_LISTS_CHANGE = 1 << 20;
        /// This property list's values changed.
        const PROPERTY_LIST_VALUES_CHANGE = 1 << 21;
        /// Applications in this root changed.
        const APPLICATIONS_CHANGE = 1 << 22;
        /// The lock directory of this notifyable changed.
        const LOCK_NODE_CHANGE = 1 << 23;
        /// Queues in this notifyable changed.
        const QUEUES_CHANGE = 1 << 24;
        /// The children of this queue changed.
        const QUEUE_CHILD_CHANGE = 1 << 25;
        /// Clusterlib has been shut down.
        const END_EVENT = 1 << 26;
        /// Notifyable desired state has changed.
        const DESIRED_STATE_CHANGE = 1 << 27;
    }
}

impl EventMask {
    /// Returns a comma-separated string of the events encoded in the mask.
    pub fn events_string(&self) -> String {
        self.iter_names()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A normalised event delivered to user handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvent {
    /// Key of the notifyable the event concerns; empty for END_EVENT.
    pub key: String,
    pub mask: EventMask,
}

/// User event handlers are registered against `(notifyable key, mask)` and
/// run on the owning client's dispatcher task, one delivery at a time.
/// Errors returned from a handler are logged by the dispatcher and do not
/// stop dispatch.
#[async_trait]
pub trait UserEventHandler: Send + Sync {
    async fn handle_user_event(&self, event: &UserEvent) -> Result<()>;

    /// Optional wait condition; the dispatcher signals it after every
    /// delivery to this handler.
    fn condition(&self) -> Option<&HandlerCondition> {
        None
    }
}

/// Timer event handlers receive the id they were scheduled under along with
/// the user data given at registration.
#[async_trait]
pub trait TimerEventHandler: Send + Sync {
    async fn handle_timer_event(&self, id: TimerId, data: Value) -> Result<()>;
}

/// Grouping of a predicate, mutex, and a condition used by handlers that
/// want to block a foreground thread until some delivery has been seen.
///
/// The user resets the predicate, waits, and re-checks its own condition on
/// wakeup; the dispatcher signals after each delivery, so spurious wakeups
/// are expected and benign.
#[derive(Debug, Default)]
pub struct HandlerCondition {
    pred: Mutex<bool>,
    cond: Notify,
}

impl HandlerCondition {
    pub fn new() -> Self {
        Default::default()
    }

    /// Signal any thread waiting on the predicate.
    pub fn signal(&self) {
        *self.pred.lock() = true;
        self.cond.notify_waiters();
    }

    /// Has the predicate been satisfied since the last reset?
    pub fn meets_condition(&self) -> bool {
        *self.pred.lock()
    }

    /// Clears the predicate before a new wait.
    pub fn reset_condition(&self) {
        *self.pred.lock() = false;
    }

    /// Waits until the predicate is signalled.  Timeout semantics: `-1`
    /// waits forever, `0` checks without blocking, `> 0` waits that many
    /// milliseconds.  Returns false if the wait expired unsignalled.
    pub async fn wait_until_condition(&self, msec_timeout: i64) -> Result<bool> {
        match msec_timeout {
            t if t < -1 => Err(ClusterlibError::invalid_arguments(format!(
                "wait_until_condition: cannot have msec_timeout < -1 ({t})"
            ))),
            0 => Ok(self.meets_condition()),
            -1 => {
                self.wait_forever().await;
                Ok(true)
            }
            t => Ok(
                tokio::time::timeout(Duration::from_millis(t as u64), self.wait_forever())
                    .await
                    .is_ok(),
            ),
        }
    }

    async fn wait_forever(&self) {
        loop {
            let notified = self.cond.notified();
            if *self.pred.lock() {
                return;
            }
            notified.await;
        }
    }
}

/// Work items drained by a client's dispatcher task.
pub(crate) enum ClientEvent {
    User(UserEvent),
    Timer {
        id: TimerId,
        data: Value,
        handler: Arc<dyn TimerEventHandler>,
    },
    /// Orderly shutdown: drain and terminate the dispatcher.
    End,
}
