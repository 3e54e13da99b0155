// src/core/notifyable/property_list.rs

//! A PropertyList: a named, versioned key-value JSON object attached to a
//! notifyable.

use crate::core::cached::CachedKeyValues;
use crate::core::notifyable::{Handle, Notifyable};

#[derive(Clone)]
pub struct PropertyList {
    pub(crate) h: Handle,
}

impl Notifyable for PropertyList {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl PropertyList {
    pub fn cached_key_values(&self) -> CachedKeyValues {
        CachedKeyValues {
            ops: self.h.ops.clone(),
            ntf: self.h.inner.clone(),
            data: self
                .h
                .inner
                .key_values
                .clone()
                .expect("property list carries key values"),
        }
    }
}
