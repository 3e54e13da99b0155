// src/core/cached/state.rs

//! Current/desired state: a bounded history of JSON state objects, newest
//! last.  A staging object holds the *next* state; publish appends it
//! (stamped with the reserved set-time keys), trims to the history bound,
//! and bumps the repository version.

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::core::cached::{CachedVar, marshal_json, parse_json, set_with_version};
use crate::core::constants::{
    ANY_VERSION, DEFAULT_MAX_HISTORY_SIZE, STATE_SET_MSECS, STATE_SET_MSECS_AS_DATE,
};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::notifyable::NotifyableInner;
use crate::core::store::Stat;

pub(crate) struct CachedStateData {
    var: CachedVar<Vec<Value>>,
    staging: Mutex<Map<String, Value>>,
    max_history_size: AtomicI32,
}

impl CachedStateData {
    pub(crate) fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            var: CachedVar::new(path),
            staging: Mutex::new(Map::new()),
            max_history_size: AtomicI32::new(DEFAULT_MAX_HISTORY_SIZE),
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.var.path()
    }

    pub(crate) fn parse(data: &Bytes) -> Result<Vec<Value>> {
        match parse_json(data)? {
            Value::Array(history) => Ok(history),
            other => Err(ClusterlibError::repository_internals(format!(
                "state history is not a JSON array: {other}"
            ))),
        }
    }

    pub(crate) async fn reload(&self, ops: &FactoryOps) -> Result<()> {
        self.var.load(ops, Self::parse).await
    }

    pub(crate) fn set_max_history_size(&self, max_history_size: i32) {
        self.max_history_size
            .store(max_history_size, Ordering::SeqCst);
    }
}

/// Handle to one notifyable's current or desired state.
#[derive(Clone)]
pub struct CachedState {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) ntf: Arc<NotifyableInner>,
    pub(crate) data: Arc<CachedStateData>,
}

impl CachedState {
    async fn ensure_loaded(&self) -> Result<()> {
        if !self.data.var.is_loaded().await {
            self.data.reload(&self.ops).await?;
        }
        Ok(())
    }

    /// Reloads from the repository, discarding unpublished staged keys is
    /// not part of reset: only the history array is replaced.
    pub async fn reset(&self) -> Result<()> {
        self.data.reload(&self.ops).await
    }

    /// Appends the staged state to the history, trims the oldest entries
    /// beyond the history bound, and writes back under the optimistic
    /// version check.
    pub async fn publish(&self, unconditional: bool) -> Result<i32> {
        self.ntf.ensure_ready()?;
        let mut entry = self.data.staging.lock().clone();
        let now = chrono::Utc::now();
        entry.insert(
            STATE_SET_MSECS.to_string(),
            Value::from(now.timestamp_millis()),
        );
        entry.insert(
            STATE_SET_MSECS_AS_DATE.to_string(),
            Value::from(now.to_rfc3339()),
        );

        let mut fields = self.data.var.lock().await;
        let mut candidate = fields.data.clone();
        candidate.push(Value::Object(entry));
        let bound = self.max_history_size().max(1) as usize;
        while candidate.len() > bound {
            candidate.remove(0);
        }
        let encoded = marshal_json(&Value::Array(candidate.clone()))?;
        let version = if unconditional {
            ANY_VERSION
        } else {
            fields.stat.version
        };
        let stat = set_with_version(
            &self.ops,
            self.data.var.path(),
            encoded,
            version,
            fields.stat.version,
        )
        .await?;
        fields.data = candidate;
        fields.stat = stat;
        fields.loaded = true;
        Ok(stat.version)
    }

    pub async fn get_version(&self) -> i32 {
        self.data.var.version().await
    }

    pub async fn get_stats(&self) -> Stat {
        self.data.var.stat().await
    }

    pub fn max_history_size(&self) -> i32 {
        self.data.max_history_size.load(Ordering::SeqCst)
    }

    pub fn set_max_history_size(&self, max_history_size: i32) {
        self.data
            .max_history_size
            .store(max_history_size, Ordering::SeqCst);
    }

    /// Stages a key for the next publish.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.staging.lock().insert(key.into(), value);
        Ok(())
    }

    /// Removes a staged key.  Returns false if it was not staged.
    pub fn erase(&self, key: &str) -> Result<bool> {
        self.ntf.ensure_ready()?;
        Ok(self.data.staging.lock().remove(key).is_some())
    }

    /// Clears all staged keys.
    pub fn clear(&self) -> Result<()> {
        self.ntf.ensure_ready()?;
        self.data.staging.lock().clear();
        Ok(())
    }

    /// Number of published states currently held.
    pub async fn history_size(&self) -> Result<i32> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.len() as i32)
    }

    /// Reads a key from the history, `0` being the newest entry.
    pub async fn get_history(&self, history_index: i32, key: &str) -> Result<Option<Value>> {
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        let len = fields.data.len() as i32;
        if history_index < 0 || history_index >= len {
            return Err(ClusterlibError::invalid_arguments(format!(
                "history index {history_index} out of range (size {len})"
            )));
        }
        let entry = &fields.data[(len - 1 - history_index) as usize];
        Ok(entry.get(key).cloned())
    }

    /// Keys present in the selected history entry.
    pub async fn get_history_keys(&self, history_index: i32) -> Result<Vec<String>> {
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        let len = fields.data.len() as i32;
        if history_index < 0 || history_index >= len {
            return Err(ClusterlibError::invalid_arguments(format!(
                "history index {history_index} out of range (size {len})"
            )));
        }
        match &fields.data[(len - 1 - history_index) as usize] {
            Value::Object(map) => Ok(map.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Shorthand for `get_history(0, key)`; `None` when no state was ever
    /// published.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_loaded().await?;
        {
            let fields = self.data.var.lock().await;
            if fields.data.is_empty() {
                return Ok(None);
            }
        }
        self.get_history(0, key).await
    }

    /// The whole history array, oldest first.
    pub async fn get_history_array(&self) -> Result<Vec<Value>> {
        self.ensure_loaded().await?;
        Ok(self.data.var.lock().await.data.clone())
    }
}
