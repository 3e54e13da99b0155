// src/core/notifyable/data_distribution.rs

//! A DataDistribution: a consistent-hash shard table routing hashed work
//! onto notifyables.

use crate::core::cached::CachedShards;
use crate::core::errors::Result;
use crate::core::hashrange::HashRange;
use crate::core::notifyable::{
    AccessType, Handle, HasPropertyLists, Notifyable, NotifyableHandle,
};

#[derive(Clone)]
pub struct DataDistribution {
    pub(crate) h: Handle,
}

impl Notifyable for DataDistribution {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasPropertyLists for DataDistribution {}

impl DataDistribution {
    pub fn cached_shards(&self) -> CachedShards {
        CachedShards {
            ops: self.h.ops.clone(),
            ntf: self.h.inner.clone(),
            data: self
                .h
                .inner
                .shards
                .clone()
                .expect("data distribution carries shards"),
        }
    }

    /// Resolves the covering shards of `point` to live handles, preserving
    /// the priority order of the underlying query.  Keys that no longer
    /// resolve are skipped.
    pub async fn get_notifyables(&self, point: &HashRange) -> Result<Vec<NotifyableHandle>> {
        let keys = self.cached_shards().get_notifyable_keys(point).await?;
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(inner) = self
                .h
                .ops
                .notifyable_by_key(&key, AccessType::LoadFromRepository)
                .await?
            {
                handles.push(NotifyableHandle::wrap(Handle {
                    ops: self.h.ops.clone(),
                    inner,
                }));
            }
        }
        Ok(handles)
    }
}
