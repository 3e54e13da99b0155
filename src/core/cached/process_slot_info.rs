// src/core/cached/process_slot_info.rs

//! Node process-slot info: whether slots are enabled on this node and how
//! many it will carry, marshalled as `[enable, maxSlots]`.

use bytes::Bytes;
use std::sync::Arc;

use crate::core::cached::CachedVar;
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::notifyable::NotifyableInner;
use crate::core::store::Stat;

type SlotInfo = (bool, i64);

pub(crate) struct CachedProcessSlotInfoData {
    var: CachedVar<SlotInfo>,
}

impl CachedProcessSlotInfoData {
    pub(crate) fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            var: CachedVar::new(path),
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.var.path()
    }

    pub(crate) fn parse(data: &Bytes) -> Result<SlotInfo> {
        serde_json::from_slice(data).map_err(|e| {
            ClusterlibError::repository_internals(format!("unparseable process slot info: {e}"))
        })
    }

    pub(crate) async fn reload(&self, ops: &FactoryOps) -> Result<()> {
        self.var.load(ops, Self::parse).await
    }
}

/// Handle to one Node's slot usage policy.
#[derive(Clone)]
pub struct CachedProcessSlotInfo {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) ntf: Arc<NotifyableInner>,
    pub(crate) data: Arc<CachedProcessSlotInfoData>,
}

impl CachedProcessSlotInfo {
    async fn ensure_loaded(&self) -> Result<()> {
        if !self.data.var.is_loaded().await {
            self.data.reload(&self.ops).await?;
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.data.reload(&self.ops).await
    }

    pub async fn publish(&self, unconditional: bool) -> Result<i32> {
        self.ntf.ensure_ready()?;
        self.data
            .var
            .publish(&self.ops, unconditional, |info| {
                Ok(Bytes::from(serde_json::to_vec(info)?))
            })
            .await
    }

    pub async fn get_version(&self) -> i32 {
        self.data.var.version().await
    }

    pub async fn get_stats(&self) -> Stat {
        self.data.var.stat().await
    }

    pub async fn get_enable(&self) -> Result<bool> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.0)
    }

    pub async fn set_enable(&self, enable: bool) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.0 = enable;
        Ok(())
    }

    pub async fn get_max_process_slots(&self) -> Result<i64> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.1)
    }

    pub async fn set_max_process_slots(&self, max_slots: i64) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.1 = max_slots;
        Ok(())
    }
}
