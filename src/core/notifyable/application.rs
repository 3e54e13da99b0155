// src/core/notifyable/application.rs

//! An Application: a namespace for groups, data distributions, property
//! lists, and queues.

use crate::core::notifyable::{
    Handle, HasDataDistributions, HasGroups, HasPropertyLists, HasQueues, Notifyable,
};

#[derive(Clone)]
pub struct Application {
    pub(crate) h: Handle,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").field("key", &self.key()).finish()
    }
}

impl Notifyable for Application {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasGroups for Application {}
impl HasDataDistributions for Application {}
impl HasPropertyLists for Application {}
impl HasQueues for Application {}
