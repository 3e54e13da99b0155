// src/core/hashrange.rs

//! Hash-range points used by data-distribution shards.
//!
//! The default representation is an unsigned 64-bit point.  Payloads written
//! by readers with a newer or foreign range representation round-trip
//! opaquely through [`HashRange::Unknown`] so that rewriting a shard table
//! never loses data.  `u64::MAX` is terminal: `next()` saturates there and
//! ranges ending at `MAX` include it.

use serde_json::Value;
use std::cmp::Ordering;

use crate::core::errors::{ClusterlibError, Result};

/// Registered name of the unsigned 64-bit range representation.
pub const UINT64_RANGE_NAME: &str = "uint_64";
/// Name reported by opaque payloads.
pub const UNKNOWN_RANGE_NAME: &str = "unknown";

/// A single point in a hash range.
#[derive(Debug, Clone, PartialEq)]
pub enum HashRange {
    Uint64(u64),
    /// JSON payload preserved verbatim for foreign range representations.
    Unknown(Value),
}

impl HashRange {
    /// The smallest representable point.
    pub fn begin() -> Self {
        HashRange::Uint64(u64::MIN)
    }

    /// The terminal point.
    pub fn end() -> Self {
        HashRange::Uint64(u64::MAX)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HashRange::Uint64(_) => UINT64_RANGE_NAME,
            HashRange::Unknown(_) => UNKNOWN_RANGE_NAME,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, HashRange::Uint64(p) if *p == u64::MIN)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, HashRange::Uint64(p) if *p == u64::MAX)
    }

    /// Advances to the next representable point.  Saturates at the terminal
    /// point rather than wrapping.
    pub fn next(&mut self) {
        if let HashRange::Uint64(p) = self {
            *p = p.saturating_add(1);
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            HashRange::Uint64(p) => Value::from(*p),
            HashRange::Unknown(v) => v.clone(),
        }
    }

    /// Reconstructs a point from its JSON representation.  Unsigned integers
    /// become `Uint64`; any other shape is preserved opaquely.
    pub fn from_json(value: &Value) -> Self {
        match value.as_u64() {
            Some(p) => HashRange::Uint64(p),
            None => HashRange::Unknown(value.clone()),
        }
    }

    /// The underlying point, for range representations that support queries.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            HashRange::Uint64(p) => Ok(*p),
            HashRange::Unknown(v) => Err(ClusterlibError::invalid_arguments(format!(
                "hash range payload {v} is not queryable"
            ))),
        }
    }
}

impl PartialOrd for HashRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (HashRange::Uint64(a), HashRange::Uint64(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<u64> for HashRange {
    fn from(p: u64) -> Self {
        HashRange::Uint64(p)
    }
}

/// Maps an arbitrary byte string onto the 64-bit hash range.
///
/// Adapted from Jenkins' one-at-a-time hash; the accumulator is 32 bits wide
/// and the result is zero-extended, so independent implementations agree
/// bit-for-bit.
pub fn hash_string(input: &str) -> u64 {
    let mut hash: u32 = 0;
    for byte in input.bytes() {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash as u64
}
