// src/core/cached/mod.rs

//! The cached-data family: each mutable attribute of a notifyable is an
//! independently versioned unit with repository round-trips, optimistic
//! concurrency, and explicit publish.
//!
//! Every concrete shape shares the same discipline: `reset` reloads from the
//! store, `publish` writes local changes (rejecting stale versions unless
//! unconditional), and every successful load re-arms exactly one data watch
//! on the backing path.

pub mod key_values;
pub mod process_info;
pub mod process_slot_info;
pub mod shards;
pub mod state;

pub use key_values::CachedKeyValues;
pub use process_info::CachedProcessInfo;
pub use process_slot_info::CachedProcessSlotInfo;
pub use shards::{CachedShards, Shard};
pub use state::CachedState;

use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};

use crate::core::constants::{ANY_VERSION, INITIAL_VERSION};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::store::{Stat, StoreError};

/// Which attribute of a notifyable a backing path belongs to; used by the
/// event loop to route watch fires back to the right cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CachedAttr {
    CurrentState,
    DesiredState,
    KeyValues,
    Shards,
    ProcessInfo,
    ProcessSlotInfo,
}

/// The mutex-guarded fields common to every cached attribute.
pub(crate) struct CachedFields<T> {
    pub data: T,
    pub stat: Stat,
    pub loaded: bool,
}

/// A versioned cache of one repository node, deserialised as `T`.
pub(crate) struct CachedVar<T> {
    path: String,
    fields: Mutex<CachedFields<T>>,
}

impl<T: Default> CachedVar<T> {
    pub(crate) fn new(path: String) -> Self {
        Self {
            path,
            fields: Mutex::new(CachedFields {
                data: T::default(),
                stat: Stat {
                    version: INITIAL_VERSION,
                    ..Default::default()
                },
                loaded: false,
            }),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, CachedFields<T>> {
        self.fields.lock().await
    }

    /// Loads from the repository, replacing local content if the incoming
    /// stat is newer, and re-arms the data watch.  Empty node data parses to
    /// the default value.
    pub(crate) async fn load(
        &self,
        ops: &FactoryOps,
        parse: impl FnOnce(&Bytes) -> Result<T>,
    ) -> Result<()> {
        ops.ensure_connected()?;
        let (data, stat) = ops
            .store()
            .get(&self.path, true)
            .await
            .map_err(|e| ClusterlibError::from_store(e, &format!("load {}", self.path)))?;
        let parsed = if data.is_empty() {
            T::default()
        } else {
            parse(&data)?
        };
        let mut fields = self.fields.lock().await;
        if !fields.loaded || stat.mzxid >= fields.stat.mzxid {
            fields.data = parsed;
            fields.stat = stat;
            fields.loaded = true;
        }
        Ok(())
    }

    /// Writes `marshal`led local content with the optimistic version check,
    /// updating the local stat on success.
    pub(crate) async fn publish(
        &self,
        ops: &FactoryOps,
        unconditional: bool,
        marshal: impl FnOnce(&T) -> Result<Bytes>,
    ) -> Result<i32> {
        ops.ensure_connected()?;
        let mut fields = self.fields.lock().await;
        let encoded = marshal(&fields.data)?;
        let version = if unconditional {
            ANY_VERSION
        } else {
            fields.stat.version
        };
        let stat =
            set_with_version(ops, &self.path, encoded, version, fields.stat.version).await?;
        fields.stat = stat;
        fields.loaded = true;
        Ok(stat.version)
    }

    pub(crate) async fn version(&self) -> i32 {
        self.fields.lock().await.stat.version
    }

    pub(crate) async fn stat(&self) -> Stat {
        self.fields.lock().await.stat
    }

    pub(crate) async fn is_loaded(&self) -> bool {
        self.fields.lock().await.loaded
    }
}

/// Versioned store write shared by every publish path: maps a stale-version
/// failure to a publish conflict carrying the caller's cached version.
pub(crate) async fn set_with_version(
    ops: &FactoryOps,
    path: &str,
    data: Bytes,
    version: i32,
    cached_version: i32,
) -> Result<Stat> {
    ops.ensure_connected()?;
    match ops.store().set(path, data, version).await {
        Ok(stat) => Ok(stat),
        Err(StoreError::BadVersion(_)) => {
            Err(ClusterlibError::publish_conflict(path, cached_version))
        }
        Err(e) => Err(ClusterlibError::from_store(e, &format!("publish {path}"))),
    }
}

/// Parses node bytes as a JSON value.
pub(crate) fn parse_json(data: &Bytes) -> Result<serde_json::Value> {
    serde_json::from_slice(data).map_err(|e| {
        ClusterlibError::repository_internals(format!("unparseable repository JSON: {e}"))
    })
}

/// Encodes a JSON value as node bytes.
pub(crate) fn marshal_json(value: &serde_json::Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}
