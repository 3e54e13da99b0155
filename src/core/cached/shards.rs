// src/core/cached/shards.rs

//! DataDistribution shards: a consistent-hash table mapping hash ranges to
//! notifyable keys with priorities, backed by an interval tree for stabbing
//! queries and marshalled as a JSON array of `[start, end, key, priority]`
//! tuples.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use crate::core::cached::{CachedVar, marshal_json, parse_json};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::hashrange::{HashRange, hash_string};
use crate::core::interval_tree::IntervalTree;
use crate::core::notifyable::NotifyableInner;
use crate::core::store::Stat;

/// One element of a data distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub start: HashRange,
    pub end: HashRange,
    pub notifyable_key: String,
    pub priority: i32,
}

#[derive(Clone, PartialEq)]
struct ShardRecord {
    lo: u64,
    hi: u64,
    notifyable_key: String,
    priority: i32,
    order: u64,
}

#[derive(Default)]
pub(crate) struct ShardTable {
    tree: IntervalTree<u64, ShardRecord>,
    /// Shards whose range representation this reader cannot interpret;
    /// preserved verbatim so a publish does not lose them.
    opaque: Vec<Shard>,
    next_order: u64,
}

impl ShardTable {
    fn insert_queryable(&mut self, lo: u64, hi: u64, notifyable_key: String, priority: i32) {
        let order = self.next_order;
        self.next_order += 1;
        self.tree.insert(
            lo,
            hi,
            ShardRecord {
                lo,
                hi,
                notifyable_key,
                priority,
                order,
            },
        );
    }

    fn all_shards(&self) -> Vec<Shard> {
        let mut records: Vec<&ShardRecord> =
            self.tree.entries().into_iter().map(|(_, _, r)| r).collect();
        records.sort_by_key(|r| r.order);
        let mut shards: Vec<Shard> = records
            .into_iter()
            .map(|r| Shard {
                start: HashRange::Uint64(r.lo),
                end: HashRange::Uint64(r.hi),
                notifyable_key: r.notifyable_key.clone(),
                priority: r.priority,
            })
            .collect();
        shards.extend(self.opaque.iter().cloned());
        shards
    }
}

pub(crate) struct CachedShardsData {
    var: CachedVar<ShardTable>,
}

impl CachedShardsData {
    pub(crate) fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            var: CachedVar::new(path),
        })
    }

    pub(crate) fn path(&self) -> &str {
        self.var.path()
    }

    pub(crate) fn parse(data: &Bytes) -> Result<ShardTable> {
        let Value::Array(tuples) = parse_json(data)? else {
            return Err(ClusterlibError::repository_internals(
                "shard table is not a JSON array",
            ));
        };
        let mut table = ShardTable::default();
        for tuple in tuples {
            let Value::Array(fields) = tuple else {
                return Err(ClusterlibError::repository_internals(
                    "shard entry is not a JSON array",
                ));
            };
            if fields.len() != 4 {
                return Err(ClusterlibError::repository_internals(format!(
                    "shard entry has {} fields, expected 4",
                    fields.len()
                )));
            }
            let start = HashRange::from_json(&fields[0]);
            let end = HashRange::from_json(&fields[1]);
            let notifyable_key = fields[2]
                .as_str()
                .ok_or_else(|| {
                    ClusterlibError::repository_internals("shard notifyable key is not a string")
                })?
                .to_string();
            let priority = fields[3].as_i64().ok_or_else(|| {
                ClusterlibError::repository_internals("shard priority is not an integer")
            })? as i32;
            match (start.as_u64(), end.as_u64()) {
                (Ok(lo), Ok(hi)) => table.insert_queryable(lo, hi, notifyable_key, priority),
                _ => table.opaque.push(Shard {
                    start,
                    end,
                    notifyable_key,
                    priority,
                }),
            }
        }
        Ok(table)
    }

    fn marshal(table: &ShardTable) -> Result<Bytes> {
        let tuples: Vec<Value> = table
            .all_shards()
            .into_iter()
            .map(|s| {
                Value::Array(vec![
                    s.start.to_json(),
                    s.end.to_json(),
                    Value::from(s.notifyable_key),
                    Value::from(s.priority),
                ])
            })
            .collect();
        marshal_json(&Value::Array(tuples))
    }

    pub(crate) async fn reload(&self, ops: &FactoryOps) -> Result<()> {
        self.var.load(ops, Self::parse).await
    }
}

/// Handle to one DataDistribution's shard table.
#[derive(Clone)]
pub struct CachedShards {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) ntf: Arc<NotifyableInner>,
    pub(crate) data: Arc<CachedShardsData>,
}

impl CachedShards {
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
            .publish(&self.ops, unconditional, CachedShardsData::marshal)
            .await
    }

    pub async fn get_version(&self) -> i32 {
        self.data.var.version().await
    }

    pub async fn get_stats(&self) -> Stat {
        self.data.var.stat().await
    }

    /// Inserts a shard covering `[start, end]`.  Opaque ranges are accepted
    /// and preserved but cannot serve queries.
    pub async fn insert(
        &self,
        start: HashRange,
        end: HashRange,
        notifyable_key: &str,
        priority: i32,
    ) -> Result<()> {
        self.ntf.ensure_ready()?;
        match (start.as_u64(), end.as_u64()) {
            (Ok(lo), Ok(hi)) => {
                if lo > hi {
                    return Err(ClusterlibError::invalid_arguments(format!(
                        "shard start {lo} exceeds end {hi}"
                    )));
                }
                self.data.var.lock().await.data.insert_queryable(
                    lo,
                    hi,
                    notifyable_key.to_string(),
                    priority,
                );
            }
            _ => {
                self.data.var.lock().await.data.opaque.push(Shard {
                    start,
                    end,
                    notifyable_key: notifyable_key.to_string(),
                    priority,
                });
            }
        }
        Ok(())
    }

    /// Keys of the notifyables whose shards cover `point`, ordered by
    /// priority descending, ties broken by insertion order.
    pub async fn get_notifyable_keys(&self, point: &HashRange) -> Result<Vec<String>> {
        let point = point.as_u64()?;
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        let mut hits: Vec<&ShardRecord> = fields.data.tree.stab(&point).into_iter().collect();
        hits.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        Ok(hits.into_iter().map(|r| r.notifyable_key.clone()).collect())
    }

    /// Convenience: hashes `work_key` onto the range and queries it.
    pub async fn get_notifyable_keys_for_work(&self, work_key: &str) -> Result<Vec<String>> {
        self.get_notifyable_keys(&HashRange::Uint64(hash_string(work_key)))
            .await
    }

    pub async fn get_count(&self) -> Result<u32> {
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        Ok((fields.data.tree.len() + fields.data.opaque.len()) as u32)
    }

    /// True iff the union of the queryable shards spans the entire 64-bit
    /// range.  Fails if the table holds shards this reader cannot interpret.
    pub async fn is_covered(&self) -> Result<bool> {
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        if !fields.data.opaque.is_empty() {
            return Err(ClusterlibError::invalid_arguments(
                "shard table contains non-queryable ranges",
            ));
        }
        let mut cursor = u64::MIN;
        loop {
            let max_hi = fields
                .data
                .tree
                .stab(&cursor)
                .into_iter()
                .map(|r| r.hi)
                .max();
            match max_hi {
                None => return Ok(false),
                Some(u64::MAX) => return Ok(true),
                Some(hi) => cursor = hi + 1,
            }
        }
    }

    /// Splits the full 64-bit span into `num_shards` near-equal ranges.
    pub fn split_hash_range(&self, num_shards: u32) -> Result<Vec<(HashRange, HashRange)>> {
        if num_shards == 0 {
            return Err(ClusterlibError::invalid_arguments(
                "cannot split into zero shards",
            ));
        }
        let total = u64::MAX as u128 + 1;
        let n = num_shards as u128;
        Ok((0..n)
            .map(|i| {
                let lo = (i * total / n) as u64;
                let hi = ((i + 1) * total / n - 1) as u64;
                (HashRange::Uint64(lo), HashRange::Uint64(hi))
            })
            .collect())
    }

    /// All shards, optionally filtered by notifyable key and/or priority.
    pub async fn get_all_shards(
        &self,
        notifyable_key: Option<&str>,
        priority: Option<i32>,
    ) -> Result<Vec<Shard>> {
        self.ensure_loaded().await?;
        let fields = self.data.var.lock().await;
        Ok(fields
            .data
            .all_shards()
            .into_iter()
            .filter(|s| notifyable_key.is_none_or(|k| s.notifyable_key == k))
            .filter(|s| priority.is_none_or(|p| s.priority == p))
            .collect())
    }

    /// Removes one shard matching exactly.  Returns false if absent.
    pub async fn remove(&self, shard: &Shard) -> Result<bool> {
        self.ntf.ensure_ready()?;
        let mut fields = self.data.var.lock().await;
        if let (Ok(lo), Ok(hi)) = (shard.start.as_u64(), shard.end.as_u64()) {
            let found = fields.data.tree.entries().into_iter().find_map(|(_, _, r)| {
                (r.lo == lo
                    && r.hi == hi
                    && r.notifyable_key == shard.notifyable_key
                    && r.priority == shard.priority)
                    .then(|| r.clone())
            });
            match found {
                Some(record) => Ok(fields.data.tree.remove(&lo, &hi, &record)),
                None => Ok(false),
            }
        } else {
            let before = fields.data.opaque.len();
            if let Some(pos) = fields.data.opaque.iter().position(|s| s == shard) {
                fields.data.opaque.remove(pos);
            }
            Ok(fields.data.opaque.len() < before)
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.ntf.ensure_ready()?;
        let mut fields = self.data.var.lock().await;
        fields.data.tree.clear();
        fields.data.opaque.clear();
        Ok(())
    }
}
