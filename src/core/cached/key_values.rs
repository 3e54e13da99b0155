// src/core/cached/key_values.rs

//! Property-list key-values: a JSON object cached per PropertyList, with an
//! optional upward search through enclosing notifyables that carry a
//! property list of the same name.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::core::cached::{CachedVar, marshal_json, parse_json};
use crate::core::constants::PROPERTYLIST_DIR;
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::key;
use crate::core::notifyable::{AccessType, NotifyableInner};
use crate::core::store::Stat;

pub(crate) struct CachedKeyValuesData {
    var: CachedVar<Map<String, Value>>,
}

impl CachedKeyValuesData {
    pub(crate) fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            var: CachedVar::new(path),
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.var.path()
    }

    pub(crate) fn parse(data: &Bytes) -> Result<Map<String, Value>> {
        match parse_json(data)? {
            Value::Object(map) => Ok(map),
            other => Err(ClusterlibError::repository_internals(format!(
                "property list is not a JSON object: {other}"
            ))),
        }
    }

    pub(crate) async fn reload(&self, ops: &FactoryOps) -> Result<()> {
        self.var.load(ops, Self::parse).await
    }

    pub(crate) async fn local_get(&self, ops: &FactoryOps, key: &str) -> Result<Option<Value>> {
        if !self.var.is_loaded().await {
            self.reload(ops).await?;
        }
        Ok(self.var.lock().await.data.get(key).cloned())
    }
}

/// Handle to one PropertyList's key-value map.
#[derive(Clone)]
pub struct CachedKeyValues {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) ntf: Arc<NotifyableInner>,
    pub(crate) data: Arc<CachedKeyValuesData>,
}

impl CachedKeyValues {
    pub async fn reset(&self) -> Result<()> {
        self.data.reload(&self.ops).await
    }

    pub async fn publish(&self, unconditional: bool) -> Result<i32> {
        self.ntf.ensure_ready()?;
        self.data
            .var
            .publish(&self.ops, unconditional, |map| {
                marshal_json(&Value::Object(map.clone()))
            })
            .await
    }

    pub async fn get_version(&self) -> i32 {
        self.data.var.version().await
    }

    pub async fn get_stats(&self) -> Stat {
        self.data.var.stat().await
    }

    /// Reads a key from this property list only.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.data.local_get(&self.ops, key).await
    }

    /// Reads a key, and when absent locally walks up to the nearest
    /// enclosing notifyable carrying a property list of the same name.
    /// The returned key names the property list that produced the hit.
    pub async fn get_searching_parents(&self, kv_key: &str) -> Result<Option<(Value, String)>> {
        if let Some(value) = self.data.local_get(&self.ops, kv_key).await? {
            return Ok(Some((value, self.ntf.key.clone())));
        }
        let pl_name = self.ntf.name.clone();
        // Owner of this property list, then each enclosing owner in turn.
        let mut owner = match key::parent_key(&self.ntf.key) {
            Some(owner) => owner,
            None => return Ok(None),
        };
        while let Some(enclosing) = key::parent_key(&owner) {
            let candidate = key::child_key(&enclosing, PROPERTYLIST_DIR, &pl_name);
            if let Some(inner) = self
                .ops
                .notifyable_by_key(&candidate, AccessType::LoadFromRepository)
                .await?
                && let Some(kv) = &inner.key_values
                && let Some(value) = kv.local_get(&self.ops, kv_key).await?
            {
                return Ok(Some((value, candidate)));
            }
            owner = enclosing;
        }
        Ok(None)
    }

    pub async fn get_keys(&self) -> Result<Vec<String>> {
        if !self.data.var.is_loaded().await {
            self.data.reload(&self.ops).await?;
        }
        Ok(self.data.var.lock().await.data.keys().cloned().collect())
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.insert(key.into(), value);
        Ok(())
    }

    /// Returns false if the key was not present.
    pub async fn erase(&self, key: &str) -> Result<bool> {
        self.ntf.ensure_ready()?;
        Ok(self.data.var.lock().await.data.remove(key).is_some())
    }

    pub async fn clear(&self) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.var.lock().await.data.clear();
        Ok(())
    }
}
