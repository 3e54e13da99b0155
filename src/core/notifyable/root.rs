// src/core/notifyable/root.rs

//! The Root notifyable: the fixed top of the hierarchy, parent of all
//! applications.

use crate::core::notifyable::{Handle, HasApplications, Notifyable};

#[derive(Clone)]
pub struct Root {
    pub(crate) h: Handle,
}

impl Notifyable for Root {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasApplications for Root {}
