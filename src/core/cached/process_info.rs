// src/core/cached/process_info.rs

//! ProcessSlot process info: parallel hostname and port arrays, marshalled
//! as a two-element JSON array.

use bytes::Bytes;
use std::sync::Arc;

use crate::core::cached::CachedVar;
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::notifyable::NotifyableInner;
use crate::core::store::Stat;

type ProcessInfo = (Vec<String>, Vec<i64>);

pub(crate) struct CachedProcessInfoData {
    var: CachedVar<ProcessInfo>,
}

impl CachedProcessInfoData {
    pub(crate) fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            var: CachedVar::new(path),
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.var.path()
    }

    pub(crate) fn parse(data: &Bytes) -> Result<ProcessInfo> {
        serde_json::from_slice(data).map_err(|e| {
            ClusterlibError::repository_internals(format!("unparseable process info: {e}"))
        })
    }

    pub(crate) async fn reload(&self, ops: &FactoryOps) -> Result<()> {
        self.var.load(ops, Self::parse).await
    }
}

/// Handle to one ProcessSlot's hostname/port arrays.
#[derive(Clone)]
pub struct CachedProcessInfo {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) ntf: Arc<NotifyableInner>,
    pub(crate) data: Arc<CachedProcessInfoData>,
}

impl CachedProcessInfo {
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

    pub async fn get_hostnames(&self) -> Result<Vec<String>> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.0.clone())
    }

    pub async fn set_hostnames(&self, hostnames: Vec<String>) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.0 = hostnames;
        Ok(())
    }

    pub async fn get_ports(&self) -> Result<Vec<i64>> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.1.clone())
    }

    pub async fn set_ports(&self, ports: Vec<i64>) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.1 = ports;
        Ok(())
    }
}
