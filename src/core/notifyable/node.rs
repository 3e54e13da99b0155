// src/core/notifyable/node.rs

//! A Node: one member of a group, carrying process slots and the
//! slot-usage policy.

use crate::core::cached::CachedProcessSlotInfo;
use crate::core::notifyable::{
    Handle, HasProcessSlots, HasPropertyLists, HasQueues, Notifyable,
};

#[derive(Clone)]
pub struct Node {
    pub(crate) h: Handle,
}

impl Notifyable for Node {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasProcessSlots for Node {}
impl HasPropertyLists for Node {}
impl HasQueues for Node {}

impl Node {
    pub fn cached_process_slot_info(&self) -> CachedProcessSlotInfo {
        CachedProcessSlotInfo {
            ops: self.h.ops.clone(),
            ntf: self.h.inner.clone(),
            data: self
                .h
                .inner
                .process_slot_info
                .clone()
                .expect("node carries process slot info"),
        }
    }
}
