// src/core/notifyable/process_slot.rs

//! A ProcessSlot: a place on a node where one managed process runs, with
//! versioned desired/current state and process info.

use crate::core::cached::CachedProcessInfo;
use crate::core::notifyable::{Handle, HasPropertyLists, HasQueues, Notifyable};

#[derive(Clone)]
pub struct ProcessSlot {
    pub(crate) h: Handle,
}

impl Notifyable for ProcessSlot {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasPropertyLists for ProcessSlot {}
impl HasQueues for ProcessSlot {}

impl ProcessSlot {
    pub fn cached_process_info(&self) -> CachedProcessInfo {
        CachedProcessInfo {
            ops: self.h.ops.clone(),
            ntf: self.h.inner.clone(),
            data: self
                .h
                .inner
                .process_info
                .clone()
                .expect("process slot carries process info"),
        }
    }
}
