// src/core/timer.rs

//! The factory-wide timer service.
//!
//! Callers schedule a handler to fire after a delay; expirations are pushed
//! onto the owning client's event queue so timer handlers share the
//! dispatcher's one-at-a-time delivery model.  Cancellation is keyed by
//! [`TimerId`] and safe from any task.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::blocking_queue::BlockingQueue;
use crate::core::events::{ClientEvent, TimerEventHandler};

/// Identifier handed back by `schedule`, used to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

struct TimerEntry {
    data: Value,
    handler: Arc<dyn TimerEventHandler>,
    queue: Arc<BlockingQueue<ClientEvent>>,
}

#[derive(Default)]
struct TimerTable {
    /// Ordered by deadline; the id disambiguates equal deadlines.
    by_deadline: BTreeMap<(Instant, TimerId), TimerEntry>,
    /// Deadline lookup for O(log n) cancellation.
    deadlines: BTreeMap<TimerId, Instant>,
}

pub(crate) struct TimerService {
    epoch: Instant,
    next_id: AtomicU64,
    table: Mutex<TimerTable>,
    changed: Notify,
}

impl TimerService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            next_id: AtomicU64::new(0),
            table: Mutex::new(TimerTable::default()),
            changed: Notify::new(),
        })
    }

    /// Milliseconds on the service's monotonic clock.
    pub(crate) fn current_time_msecs(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Schedules `handler` to fire once, `after_msecs` from now, delivering
    /// through `queue`.
    pub(crate) fn schedule(
        &self,
        after_msecs: u64,
        data: Value,
        handler: Arc<dyn TimerEventHandler>,
        queue: Arc<BlockingQueue<ClientEvent>>,
    ) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let deadline = Instant::now() + Duration::from_millis(after_msecs);
        {
            let mut table = self.table.lock();
            table.by_deadline.insert(
                (deadline, id),
                TimerEntry {
                    data,
                    handler,
                    queue,
                },
            );
            table.deadlines.insert(id, deadline);
        }
        self.changed.notify_one();
        debug!(timer_id = id.0, after_msecs, "scheduled timer");
        id
    }

    /// Cancels a pending timer.  Returns false if it already fired or was
    /// never scheduled.
    pub(crate) fn cancel(&self, id: TimerId) -> bool {
        let mut table = self.table.lock();
        match table.deadlines.remove(&id) {
            Some(deadline) => {
                table.by_deadline.remove(&(deadline, id));
                debug!(timer_id = id.0, "cancelled timer");
                true
            }
            None => false,
        }
    }

    /// Runs the expiration loop until shutdown.
    pub(crate) async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("timer service started");
        loop {
            let next_deadline = self.table.lock().by_deadline.keys().next().map(|(d, _)| *d);
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("timer service shutting down");
                    return;
                }
                _ = self.changed.notified() => {}
                _ = Self::sleep_until_opt(next_deadline) => {
                    self.fire_due();
                }
            }
        }
    }

    async fn sleep_until_opt(deadline: Option<Instant>) {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    }

    fn fire_due(&self) {
        let now = Instant::now();
        loop {
            let due = {
                let mut table = self.table.lock();
                let Some((&(deadline, id), _)) = table.by_deadline.iter().next() else {
                    return;
                };
                if deadline > now {
                    return;
                }
                table.deadlines.remove(&id);
                table
                    .by_deadline
                    .remove(&(deadline, id))
                    .map(|entry| (id, entry))
            };
            if let Some((id, entry)) = due {
                debug!(timer_id = id.0, "timer fired");
                entry.queue.put(ClientEvent::Timer {
                    id,
                    data: entry.data,
                    handler: entry.handler,
                });
            }
        }
    }
}
