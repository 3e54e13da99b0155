// src/core/notifyable/queue.rs

//! A Queue: a durable FIFO of string payloads backed by sequenced
//! persistent children of the queue's key.
//!
//! `take` deletes the lowest-suffix element atomically; concurrent
//! consumers race on the delete and the loser retries, so every element is
//! delivered exactly once.  Timeout semantics follow the original queue
//! contract: `0` waits indefinitely, `< 0` returns immediately, `> 0`
//! bounds the wait in milliseconds.

use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::time::Instant;

use crate::core::constants::{QUEUE_ELEMENT_MAX_BYTES, QUEUE_ELEMENT_PREFIX};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::locks::parse_sequence;
use crate::core::notifyable::{Handle, Notifyable};
use crate::core::store::{CreateMode, StoreError};

#[derive(Clone)]
pub struct Queue {
    pub(crate) h: Handle,
}

impl Notifyable for Queue {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl Queue {
    /// Appends an element (at most 1 MiB) and returns its id.
    pub async fn put(&self, element: &str) -> Result<i64> {
        self.h.inner.ensure_ready()?;
        self.h.ops.ensure_connected()?;
        if element.len() > QUEUE_ELEMENT_MAX_BYTES {
            return Err(ClusterlibError::invalid_arguments(format!(
                "queue element of {} bytes exceeds the 1 MiB bound",
                element.len()
            )));
        }
        let prefix = format!("{}/{QUEUE_ELEMENT_PREFIX}", self.h.inner.key);
        let created = self
            .h
            .ops
            .store()
            .create(
                &prefix,
                Bytes::copy_from_slice(element.as_bytes()),
                CreateMode::PersistentSequential,
            )
            .await
            .map_err(|e| ClusterlibError::from_store(e, "queue put"))?;
        parse_sequence(&created)
            .map(|seq| seq as i64)
            .ok_or_else(|| {
                ClusterlibError::inconsistent(format!("queue element without sequence: {created}"))
            })
    }

    /// Retrieves and removes the head of the queue, waiting for an element
    /// if necessary.  `None` means the wait expired empty.
    pub async fn take_wait_msecs(&self, msec_timeout: i64) -> Result<Option<String>> {
        self.h.inner.ensure_ready()?;
        let deadline = if msec_timeout > 0 {
            Some(Instant::now() + std::time::Duration::from_millis(msec_timeout as u64))
        } else {
            None
        };
        loop {
            self.h.ops.ensure_connected()?;
            let mut changes = self.h.ops.subscribe_queue_changes(&self.h.inner.key);
            if let Some(element) = self.try_take_lowest().await? {
                return Ok(Some(element));
            }
            if msec_timeout < 0 {
                return Ok(None);
            }
            let wait = async {
                let _ = changes.changed().await;
            };
            match deadline {
                None => wait.await,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(None);
                    }
                    if tokio::time::timeout(d - now, wait).await.is_err() {
                        // One last look before reporting empty.
                        return self.try_take_lowest().await;
                    }
                }
            }
        }
    }

    /// Retrieves and removes the head, waiting indefinitely.
    pub async fn take(&self) -> Result<String> {
        self.take_wait_msecs(0).await?.ok_or_else(|| {
            ClusterlibError::connection_failure("queue take released by end of service")
        })
    }

    /// The head element without removing it.
    pub async fn front(&self) -> Result<Option<String>> {
        self.h.inner.ensure_ready()?;
        self.h.ops.ensure_connected()?;
        for (_, path) in self.sorted_element_paths(false).await? {
            match self.h.ops.store().get(&path, false).await {
                Ok((data, _)) => return Ok(Some(decode_payload(&data)?)),
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(ClusterlibError::from_store(e, "queue front")),
            }
        }
        Ok(None)
    }

    /// Number of elements.  Does not lock; hold the queue's distributed
    /// lock to keep it stable across calls.
    pub async fn size(&self) -> Result<i64> {
        Ok(self.sorted_element_paths(false).await?.len() as i64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.sorted_element_paths(false).await?.is_empty())
    }

    /// Removes a specific element by id.  Returns false if it was already
    /// gone.
    pub async fn remove_element(&self, id: i64) -> Result<bool> {
        self.h.inner.ensure_ready()?;
        self.h.ops.ensure_connected()?;
        let path = format!(
            "{}/{QUEUE_ELEMENT_PREFIX}{id:010}",
            self.h.inner.key
        );
        match self.h.ops.store().delete(&path, -1).await {
            Ok(()) => Ok(true),
            Err(StoreError::NoNode(_)) => Ok(false),
            Err(e) => Err(ClusterlibError::from_store(e, "queue remove element")),
        }
    }

    /// Deletes every element.
    pub async fn clear(&self) -> Result<()> {
        self.h.inner.ensure_ready()?;
        self.h.ops.ensure_connected()?;
        for (_, path) in self.sorted_element_paths(false).await? {
            match self.h.ops.store().delete(&path, -1).await {
                Ok(()) | Err(StoreError::NoNode(_)) => {}
                Err(e) => return Err(ClusterlibError::from_store(e, "queue clear")),
            }
        }
        Ok(())
    }

    /// All elements currently in the queue, keyed by id.
    pub async fn get_all_elements(&self) -> Result<BTreeMap<i64, String>> {
        self.h.inner.ensure_ready()?;
        self.h.ops.ensure_connected()?;
        let mut elements = BTreeMap::new();
        for (id, path) in self.sorted_element_paths(false).await? {
            match self.h.ops.store().get(&path, false).await {
                Ok((data, _)) => {
                    elements.insert(id, decode_payload(&data)?);
                }
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(ClusterlibError::from_store(e, "queue list elements")),
            }
        }
        Ok(elements)
    }

    async fn sorted_element_paths(&self, watch: bool) -> Result<Vec<(i64, String)>> {
        let children = self
            .h
            .ops
            .store()
            .get_children(&self.h.inner.key, watch)
            .await
            .map_err(|e| ClusterlibError::from_store(e, "list queue elements"))?;
        let mut elements: Vec<(i64, String)> = children
            .into_iter()
            .filter(|name| name.starts_with(QUEUE_ELEMENT_PREFIX))
            .filter_map(|name| {
                parse_sequence(&name).map(|seq| (seq as i64, format!("{}/{name}", self.h.inner.key)))
            })
            .collect();
        elements.sort_by_key(|(id, _)| *id);
        Ok(elements)
    }

    /// One pass over the current elements: read then delete the lowest;
    /// a concurrent taker winning the delete sends us to the next element.
    async fn try_take_lowest(&self) -> Result<Option<String>> {
        for (_, path) in self.sorted_element_paths(true).await? {
            let payload = match self.h.ops.store().get(&path, false).await {
                Ok((data, _)) => decode_payload(&data)?,
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(ClusterlibError::from_store(e, "queue take read")),
            };
            match self.h.ops.store().delete(&path, -1).await {
                Ok(()) => return Ok(Some(payload)),
                Err(StoreError::NoNode(_)) => continue,
                Err(e) => return Err(ClusterlibError::from_store(e, "queue take delete")),
            }
        }
        Ok(None)
    }
}

fn decode_payload(data: &Bytes) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|_| ClusterlibError::repository_internals("queue element is not valid UTF-8"))
}
