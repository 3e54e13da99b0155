// src/core/locks.rs

//! Fair shared/exclusive distributed locks over sequence-ephemeral bids.
//!
//! A bid is a sequence ephemeral child `<lockDir>/bid_<mode>_<clientId>_`
//! (the store appends the ten-digit suffix).  Grant order is strict FIFO
//! over sequence numbers: a shared bid waits on the nearest prior exclusive
//! bid, an exclusive bid waits on its immediate predecessor.  Waiters block
//! on an in-process wait map keyed by the predecessor's bid path; the
//! factory's event loop signals the condition when the predecessor's delete
//! event arrives, so threads of one client coordinate without extra store
//! traffic.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::constants::{LOCK_DIR, PARTIAL_LOCK_TAG, SEQUENCE_NUMBER_SIZE};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::events::HandlerCondition;
use crate::core::factory::FactoryOps;
use crate::core::store::{CreateMode, StoreError};

/// Desired type of distributed lock.  The locking policy is fair: all locks
/// are granted in order of requests, though readers are granted
/// simultaneous access when possible.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString,
)]
pub enum DistributedLockMode {
    /// Initialized value; invalid for actual use and never written.
    #[strum(serialize = "DIST_LOCK_INIT")]
    Init,
    /// Shared lock, typically used for reading.
    #[strum(serialize = "DIST_LOCK_SHARED")]
    Shared,
    /// Exclusive lock, typically used for reading and writing.
    #[strum(serialize = "DIST_LOCK_EXCL")]
    Excl,
}

/// The per-notifyable lock namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockName {
    /// General-purpose user lock.
    Notifyable,
    /// Advisory ownership (leadership) lock; same semantics as
    /// [`LockName::Notifyable`], separate namespace.
    Ownership,
    /// Guards creation and removal of children.
    Child,
}

impl LockName {
    pub fn dir_name(&self) -> &'static str {
        match self {
            LockName::Notifyable => crate::core::constants::NOTIFYABLE_LOCK,
            LockName::Ownership => crate::core::constants::OWNERSHIP_LOCK,
            LockName::Child => crate::core::constants::CHILD_LOCK,
        }
    }
}

/// A parsed bid node.
#[derive(Debug, Clone, PartialEq)]
pub struct LockBid {
    pub name: String,
    pub mode: DistributedLockMode,
    pub client_id: String,
    pub sequence: u64,
}

struct HeldLock {
    mode: DistributedLockMode,
    refcount: u32,
    bid_path: String,
}

/// In-process lock state for one factory: held-lock refcounts and the wait
/// map of predecessor bids to conditions.
#[derive(Default)]
pub(crate) struct DistributedLocks {
    wait_map: DashMap<String, Arc<HandlerCondition>>,
    held: DashMap<String, HeldLock>,
}

pub(crate) fn lock_dir(ntf_key: &str, lock_name: LockName) -> String {
    format!("{ntf_key}/{LOCK_DIR}/{}", lock_name.dir_name())
}

pub(crate) fn parse_sequence(path: &str) -> Option<u64> {
    if path.len() < SEQUENCE_NUMBER_SIZE {
        return None;
    }
    path[path.len() - SEQUENCE_NUMBER_SIZE..].parse().ok()
}

pub(crate) fn parse_bid(name: &str) -> Option<LockBid> {
    let rest = name.strip_prefix(&format!("{PARTIAL_LOCK_TAG}_"))?;
    let (mode, rest) = if let Some(r) =
        rest.strip_prefix(&format!("{}_", DistributedLockMode::Shared))
    {
        (DistributedLockMode::Shared, r)
    } else if let Some(r) = rest.strip_prefix(&format!("{}_", DistributedLockMode::Excl)) {
        (DistributedLockMode::Excl, r)
    } else {
        return None;
    };
    if rest.len() <= SEQUENCE_NUMBER_SIZE {
        return None;
    }
    let (client_part, seq_part) = rest.split_at(rest.len() - SEQUENCE_NUMBER_SIZE);
    let client_id = client_part.strip_suffix('_')?;
    let sequence: u64 = seq_part.parse().ok()?;
    Some(LockBid {
        name: name.to_string(),
        mode,
        client_id: client_id.to_string(),
        sequence,
    })
}

impl DistributedLocks {
    /// Acquires a lock on `ntf_key` per the bid protocol.  Timeout
    /// semantics: `-1` waits forever, `0` never blocks, `> 0` waits that
    /// many milliseconds then fails with *lock timeout* and withdraws the
    /// bid.  Re-entrant acquisition by the same client is refcounted.
    pub(crate) async fn acquire(
        &self,
        ops: &FactoryOps,
        ntf_key: &str,
        lock_name: LockName,
        mode: DistributedLockMode,
        msec_timeout: i64,
    ) -> Result<()> {
        if mode == DistributedLockMode::Init {
            return Err(ClusterlibError::invalid_arguments(
                "DIST_LOCK_INIT cannot be acquired",
            ));
        }
        if msec_timeout < -1 {
            return Err(ClusterlibError::invalid_arguments(format!(
                "acquire: cannot have msec_timeout < -1 ({msec_timeout})"
            )));
        }
        let dir = lock_dir(ntf_key, lock_name);

        if let Some(mut held) = self.held.get_mut(&dir) {
            if held.mode == mode || held.mode == DistributedLockMode::Excl {
                held.refcount += 1;
                return Ok(());
            }
            return Err(ClusterlibError::invalid_method(format!(
                "cannot upgrade shared lock to exclusive on {ntf_key}"
            )));
        }

        ops.ensure_connected()?;
        self.ensure_lock_dir(ops, ntf_key, &dir).await?;

        let bid_prefix = format!("{dir}/{PARTIAL_LOCK_TAG}_{mode}_{}_", ops.client_id());
        let bid_path = ops
            .store()
            .create(&bid_prefix, Bytes::new(), CreateMode::EphemeralSequential)
            .await
            .map_err(|e| ClusterlibError::from_store(e, "create lock bid"))?;
        let my_sequence = parse_sequence(&bid_path).ok_or_else(|| {
            ClusterlibError::inconsistent(format!("bid path without sequence: {bid_path}"))
        })?;
        debug!(%bid_path, %mode, "placed lock bid");

        let deadline = match msec_timeout {
            -1 => None,
            t => Some(Instant::now() + std::time::Duration::from_millis(t as u64)),
        };

        loop {
            if !ops.is_live() {
                self.abandon(ops, &bid_path).await;
                return Err(ClusterlibError::connection_failure(
                    "session lost while acquiring lock",
                ));
            }
            let children = match ops.store().get_children(&dir, false).await {
                Ok(children) => children,
                Err(e) => {
                    self.abandon(ops, &bid_path).await;
                    return Err(ClusterlibError::from_store(e, "list lock bids"));
                }
            };
            let mut bids: Vec<LockBid> = children.iter().filter_map(|c| parse_bid(c)).collect();
            bids.sort_by_key(|b| b.sequence);

            let blocker = match mode {
                DistributedLockMode::Excl => {
                    bids.iter().filter(|b| b.sequence < my_sequence).next_back()
                }
                DistributedLockMode::Shared => bids
                    .iter()
                    .filter(|b| {
                        b.sequence < my_sequence && b.mode == DistributedLockMode::Excl
                    })
                    .next_back(),
                DistributedLockMode::Init => unreachable!(),
            };

            let Some(blocker) = blocker else {
                self.held.insert(
                    dir.clone(),
                    HeldLock {
                        mode,
                        refcount: 1,
                        bid_path: bid_path.clone(),
                    },
                );
                debug!(%bid_path, %mode, "lock granted");
                return Ok(());
            };

            let pred_path = format!("{dir}/{}", blocker.name);
            let cond = self
                .wait_map
                .entry(pred_path.clone())
                .or_insert_with(|| Arc::new(HandlerCondition::new()))
                .clone();

            match ops.store().exists(&pred_path, true).await {
                Ok(None) => continue,
                Ok(Some(_)) => {
                    let wait_msecs = match deadline {
                        None => -1,
                        Some(d) => {
                            let now = Instant::now();
                            if now >= d {
                                self.abandon(ops, &bid_path).await;
                                return Err(ClusterlibError::lock_timeout(msec_timeout));
                            }
                            ((d - now).as_millis() as i64).max(1)
                        }
                    };
                    debug!(%bid_path, %pred_path, wait_msecs, "waiting on predecessor bid");
                    if !cond.wait_until_condition(wait_msecs).await? {
                        self.abandon(ops, &bid_path).await;
                        return Err(ClusterlibError::lock_timeout(msec_timeout));
                    }
                }
                Err(e) => {
                    self.abandon(ops, &bid_path).await;
                    return Err(ClusterlibError::from_store(e, "watch predecessor bid"));
                }
            }
        }
    }

    /// Decrements the re-entrancy count; deletes the bid when it reaches
    /// zero.
    pub(crate) async fn release(
        &self,
        ops: &FactoryOps,
        ntf_key: &str,
        lock_name: LockName,
    ) -> Result<()> {
        let dir = lock_dir(ntf_key, lock_name);
        let bid_path = {
            let Some(mut held) = self.held.get_mut(&dir) else {
                return Err(ClusterlibError::invalid_method(format!(
                    "release: {} not held on {ntf_key}",
                    lock_name.dir_name()
                )));
            };
            held.refcount -= 1;
            if held.refcount > 0 {
                return Ok(());
            }
            held.bid_path.clone()
        };
        self.held.remove(&dir);
        match ops.store().delete(&bid_path, -1).await {
            Ok(()) | Err(StoreError::NoNode(_)) => Ok(()),
            Err(e) => Err(ClusterlibError::from_store(e, "delete lock bid")),
        }
    }

    pub(crate) fn has_lock(&self, ntf_key: &str, lock_name: LockName) -> Option<DistributedLockMode> {
        self.held
            .get(&lock_dir(ntf_key, lock_name))
            .map(|h| h.mode)
    }

    /// The current front of the bid queue, if any.
    pub(crate) async fn get_owner(
        &self,
        ops: &FactoryOps,
        ntf_key: &str,
        lock_name: LockName,
    ) -> Result<Option<LockBid>> {
        let dir = lock_dir(ntf_key, lock_name);
        let children = match ops.store().get_children(&dir, false).await {
            Ok(children) => children,
            Err(StoreError::NoNode(_)) => return Ok(None),
            Err(e) => return Err(ClusterlibError::from_store(e, "list lock bids")),
        };
        Ok(children
            .iter()
            .filter_map(|c| parse_bid(c))
            .min_by_key(|b| b.sequence))
    }

    /// Signals the condition for a deleted predecessor bid, if any waiter
    /// is parked on it.  Called from the factory's event loop.
    pub(crate) fn signal_deleted(&self, path: &str) {
        if let Some((_, cond)) = self.wait_map.remove(path) {
            debug!(%path, "signalling lock waiters for deleted bid");
            cond.signal();
        }
    }

    /// Fails every outstanding wait and forgets all held locks.  Used on
    /// session expiry and factory shutdown; waiters observe the dead
    /// session and surface *repository connection failure*.
    pub(crate) fn invalidate_all(&self) {
        self.held.clear();
        self.wait_map.retain(|_, cond| {
            cond.signal();
            false
        });
    }

    async fn ensure_lock_dir(&self, ops: &FactoryOps, ntf_key: &str, dir: &str) -> Result<()> {
        for path in [&format!("{ntf_key}/{LOCK_DIR}"), dir] {
            match ops
                .store()
                .create(path, Bytes::new(), CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(StoreError::NodeExists(_)) => {}
                Err(StoreError::NoNode(_)) => {
                    return Err(ClusterlibError::object_removed(ntf_key));
                }
                Err(e) => return Err(ClusterlibError::from_store(e, "create lock dir")),
            }
        }
        Ok(())
    }

    async fn abandon(&self, ops: &FactoryOps, bid_path: &str) {
        if let Err(e) = ops.store().delete(bid_path, -1).await
            && !matches!(e, StoreError::NoNode(_))
        {
            warn!(%bid_path, error = %e, "failed to withdraw lock bid");
        }
    }
}
