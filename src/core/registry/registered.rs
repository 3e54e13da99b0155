// src/core/registry/registered.rs

//! The concrete registered-type descriptors.

use std::sync::Arc;

use crate::core::constants::{
    APP_COMPONENTS_COUNT, APPLICATION_DIR, CURRENT_STATE_DIR, DATADISTRIBUTION_DIR,
    DESIRED_STATE_DIR, DIST_COMPONENTS_MIN_COUNT, GROUP_COMPONENTS_MIN_COUNT, GROUP_DIR,
    KEYVAL_NODE, LOCK_DIR, NODE_COMPONENTS_MIN_COUNT, NODE_DIR, PROCESSINFO_NODE,
    PROCESSSLOT_COMPONENTS_MIN_COUNT, PROCESSSLOT_DIR, PROCESSSLOTINFO_NODE,
    PROP_COMPONENTS_MIN_COUNT, PROPERTYLIST_DIR, QUEUE_COMPONENTS_MIN_COUNT, QUEUE_DIR,
    ROOT_COMPONENTS_COUNT, ROOT_DIR, SHARDS_NODE,
};
use crate::core::key;
use crate::core::notifyable::NotifyableKind;
use crate::core::registry::RegisteredType;

fn base_list(notifyable_key: &str) -> Vec<String> {
    vec![
        notifyable_key.to_string(),
        format!("{notifyable_key}/{CURRENT_STATE_DIR}"),
        format!("{notifyable_key}/{DESIRED_STATE_DIR}"),
        format!("{notifyable_key}/{LOCK_DIR}"),
    ]
}

fn with_dirs(notifyable_key: &str, dirs: &[&str]) -> Vec<String> {
    let mut list = base_list(notifyable_key);
    list.extend(dirs.iter().map(|d| format!("{notifyable_key}/{d}")));
    list
}

struct RegisteredRoot;

impl RegisteredType for RegisteredRoot {
    fn registered_name(&self) -> &'static str {
        "root"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::Root
    }

    fn parent_dir(&self) -> &'static str {
        ROOT_DIR
    }

    fn min_components(&self) -> usize {
        ROOT_COMPONENTS_COUNT
    }

    fn is_valid_name(&self, name: &str) -> bool {
        name == ROOT_DIR
    }

    fn generate_key(&self, _parent_key: &str, _name: &str) -> String {
        key::root_key()
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        with_dirs(notifyable_key, &[APPLICATION_DIR])
    }
}

struct RegisteredApplication;

impl RegisteredType for RegisteredApplication {
    fn registered_name(&self) -> &'static str {
        "application"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::Application
    }

    fn parent_dir(&self) -> &'static str {
        APPLICATION_DIR
    }

    fn min_components(&self) -> usize {
        APP_COMPONENTS_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        with_dirs(
            notifyable_key,
            &[GROUP_DIR, DATADISTRIBUTION_DIR, PROPERTYLIST_DIR, QUEUE_DIR],
        )
    }
}

struct RegisteredGroup;

impl RegisteredType for RegisteredGroup {
    fn registered_name(&self) -> &'static str {
        "group"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::Group
    }

    fn parent_dir(&self) -> &'static str {
        GROUP_DIR
    }

    fn min_components(&self) -> usize {
        GROUP_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        with_dirs(
            notifyable_key,
            &[
                GROUP_DIR,
                NODE_DIR,
                DATADISTRIBUTION_DIR,
                PROPERTYLIST_DIR,
                QUEUE_DIR,
            ],
        )
    }
}

struct RegisteredNode;

impl RegisteredType for RegisteredNode {
    fn registered_name(&self) -> &'static str {
        "node"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::Node
    }

    fn parent_dir(&self) -> &'static str {
        NODE_DIR
    }

    fn min_components(&self) -> usize {
        NODE_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        let mut list = with_dirs(
            notifyable_key,
            &[PROCESSSLOT_DIR, PROPERTYLIST_DIR, QUEUE_DIR],
        );
        list.push(format!("{notifyable_key}/{PROCESSSLOTINFO_NODE}"));
        list
    }
}

struct RegisteredProcessSlot;

impl RegisteredType for RegisteredProcessSlot {
    fn registered_name(&self) -> &'static str {
        "processSlot"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::ProcessSlot
    }

    fn parent_dir(&self) -> &'static str {
        PROCESSSLOT_DIR
    }

    fn min_components(&self) -> usize {
        PROCESSSLOT_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        let mut list = with_dirs(notifyable_key, &[PROPERTYLIST_DIR, QUEUE_DIR]);
        list.push(format!("{notifyable_key}/{PROCESSINFO_NODE}"));
        list
    }
}

struct RegisteredDataDistribution;

impl RegisteredType for RegisteredDataDistribution {
    fn registered_name(&self) -> &'static str {
        "dataDistribution"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::DataDistribution
    }

    fn parent_dir(&self) -> &'static str {
        DATADISTRIBUTION_DIR
    }

    fn min_components(&self) -> usize {
        DIST_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        let mut list = with_dirs(notifyable_key, &[PROPERTYLIST_DIR]);
        list.push(format!("{notifyable_key}/{SHARDS_NODE}"));
        list
    }
}

struct RegisteredPropertyList;

impl RegisteredType for RegisteredPropertyList {
    fn registered_name(&self) -> &'static str {
        "propertyList"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::PropertyList
    }

    fn parent_dir(&self) -> &'static str {
        PROPERTYLIST_DIR
    }

    fn min_components(&self) -> usize {
        PROP_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        let mut list = base_list(notifyable_key);
        list.push(format!("{notifyable_key}/{KEYVAL_NODE}"));
        list
    }
}

struct RegisteredQueue;

impl RegisteredType for RegisteredQueue {
    fn registered_name(&self) -> &'static str {
        "queue"
    }

    fn kind(&self) -> NotifyableKind {
        NotifyableKind::Queue
    }

    fn parent_dir(&self) -> &'static str {
        QUEUE_DIR
    }

    fn min_components(&self) -> usize {
        QUEUE_COMPONENTS_MIN_COUNT
    }

    fn generate_repository_list(&self, _name: &str, notifyable_key: &str) -> Vec<String> {
        base_list(notifyable_key)
    }

    /// Queue keys may prefix deeper paths (their sequenced element
    /// children); resolve the longest valid queue prefix.
    fn components_to_key(&self, components: &[&str], elements: usize) -> Option<String> {
        let mut e = elements;
        while e >= self.min_components() {
            if self.is_valid_key(components, e) {
                return Some(key::join(components, e));
            }
            e -= 1;
        }
        None
    }
}

pub(crate) fn all_registered_types() -> Vec<Arc<dyn RegisteredType>> {
    vec![
        Arc::new(RegisteredRoot),
        Arc::new(RegisteredApplication),
        Arc::new(RegisteredGroup),
        Arc::new(RegisteredNode),
        Arc::new(RegisteredProcessSlot),
        Arc::new(RegisteredDataDistribution),
        Arc::new(RegisteredPropertyList),
        Arc::new(RegisteredQueue),
    ]
}
