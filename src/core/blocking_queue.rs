// src/core/blocking_queue.rs

//! An unbounded multi-producer / multi-consumer FIFO with timed take,
//! used to feed each client's event dispatcher.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::errors::{ClusterlibError, Result};

#[derive(Debug, Default)]
pub struct BlockingQueue<T> {
    queue: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Adds an element to the tail of the queue and wakes one waiter.
    pub fn put(&self, element: T) {
        self.queue.lock().push_back(element);
        self.available.notify_one();
    }

    /// Removes and returns the head if one is present.
    pub fn try_take(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Removes and returns the head, waiting forever if necessary.
    pub async fn take(&self) -> T {
        loop {
            // Register interest before the emptiness check so a concurrent
            // put cannot slip between the check and the await.
            let notified = self.available.notified();
            if let Some(element) = self.try_take() {
                // Pass any stored permit on to another waiter.
                self.available.notify_one();
                return element;
            }
            notified.await;
        }
    }

    /// Removes and returns the head with the shared timeout convention:
    /// `-1` waits forever, `0` returns immediately, `> 0` waits that many
    /// milliseconds.  `None` means the wait expired empty.
    pub async fn take_wait_msecs(&self, msec_timeout: i64) -> Result<Option<T>> {
        match msec_timeout {
            t if t < -1 => Err(ClusterlibError::invalid_arguments(format!(
                "take_wait_msecs: cannot have msec_timeout < -1 ({t})"
            ))),
            -1 => Ok(Some(self.take().await)),
            0 => Ok(self.try_take()),
            t => Ok(
                tokio::time::timeout(Duration::from_millis(t as u64), self.take())
                    .await
                    .ok(),
            ),
        }
    }

    pub fn size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}
