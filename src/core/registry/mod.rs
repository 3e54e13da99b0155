// src/core/registry/mod.rs

//! Registered types and intern tables.
//!
//! Each concrete notifyable kind has a descriptor carrying its key scheme,
//! the ordered list of store paths that must exist for an object to be
//! live, name/key validity rules, and a factory for the in-memory handle.
//! The registry is built once at factory construction and immutable
//! thereafter; one thread-safe intern table per type holds at most one
//! live handle per key.

pub mod registered;

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::key;
use crate::core::notifyable::{NotifyableInner, NotifyableKind, allowed_child_dirs};

/// Thread-safe intern table of live notifyables of one kind, keyed by
/// store key.
#[derive(Default)]
pub(crate) struct SafeNotifyableMap {
    map: DashMap<String, Arc<NotifyableInner>>,
}

impl SafeNotifyableMap {
    pub(crate) fn get(&self, notifyable_key: &str) -> Option<Arc<NotifyableInner>> {
        self.map.get(notifyable_key).map(|e| e.value().clone())
    }

    /// Inserts if the key is absent; a racing insert wins and its entry is
    /// returned, so a second lookup always yields the same handle.
    pub(crate) fn unique_insert(&self, notifyable: Arc<NotifyableInner>) -> Arc<NotifyableInner> {
        self.map
            .entry(notifyable.key.clone())
            .or_insert(notifyable)
            .value()
            .clone()
    }

    pub(crate) fn erase(&self, notifyable_key: &str) -> Option<Arc<NotifyableInner>> {
        self.map.remove(notifyable_key).map(|(_, v)| v)
    }
}

/// Descriptor of one registered notifyable type.
pub(crate) trait RegisteredType: Send + Sync {
    /// Unique type name.
    fn registered_name(&self) -> &'static str;

    fn kind(&self) -> NotifyableKind;

    /// Child directory under the parent where instances live.
    fn parent_dir(&self) -> &'static str;

    /// Minimum component count of a valid key of this type.
    fn min_components(&self) -> usize;

    fn is_valid_name(&self, name: &str) -> bool {
        key::validate_name(name).is_ok()
    }

    fn generate_key(&self, parent_key: &str, name: &str) -> String {
        key::child_key(parent_key, self.parent_dir(), name)
    }

    /// The ordered set of store paths that must exist for an object of
    /// this type to be live; the ordering is used for creation and for
    /// validation on load.
    fn generate_repository_list(&self, name: &str, notifyable_key: &str) -> Vec<String>;

    /// Whether `components[..elements]` spells a key of exactly this type.
    fn is_valid_key(&self, components: &[&str], elements: usize) -> bool {
        elements >= self.min_components()
            && kind_of_components(components, elements) == Some(self.kind())
    }

    /// Produces the in-memory handle with its cached attributes pre-wired
    /// to the backing paths.
    fn create_notifyable(&self, notifyable_key: &str, name: &str) -> NotifyableInner {
        NotifyableInner::new(self.kind(), notifyable_key, name)
    }

    /// Resolution hook: the key of the object of this type addressed by
    /// `components[..elements]`.  The default accepts only an exact match;
    /// types whose keys may prefix deeper paths override it.
    fn components_to_key(&self, components: &[&str], elements: usize) -> Option<String> {
        self.is_valid_key(components, elements)
            .then(|| key::join(components, elements))
    }
}

/// Resolves the notifyable kind addressed by a component prefix, walking
/// the child-directory table from the root.
pub(crate) fn kind_of_components(components: &[&str], elements: usize) -> Option<NotifyableKind> {
    if elements > components.len() || !key::has_clusterlib_prefix(components) {
        return None;
    }
    let mut kind = NotifyableKind::Root;
    let mut i = crate::core::constants::ROOT_COMPONENTS_COUNT;
    while i < elements {
        if i + 1 >= elements {
            return None;
        }
        let dir = components[i];
        let name = components[i + 1];
        if name.is_empty() {
            return None;
        }
        kind = allowed_child_dirs(kind)
            .iter()
            .find(|(d, _)| *d == dir)?
            .1;
        i += 2;
    }
    Some(kind)
}

/// The process-wide type table plus one intern map per type.
pub(crate) struct Registry {
    types: Vec<Arc<dyn RegisteredType>>,
    by_kind: HashMap<NotifyableKind, Arc<dyn RegisteredType>>,
    maps: HashMap<NotifyableKind, SafeNotifyableMap>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        let types = registered::all_registered_types();
        let by_kind = types
            .iter()
            .map(|t| (t.kind(), t.clone()))
            .collect::<HashMap<_, _>>();
        let maps = types
            .iter()
            .map(|t| (t.kind(), SafeNotifyableMap::default()))
            .collect();
        Self {
            types,
            by_kind,
            maps,
        }
    }

    pub(crate) fn get(&self, kind: NotifyableKind) -> &Arc<dyn RegisteredType> {
        self.by_kind.get(&kind).expect("all kinds registered")
    }

    pub(crate) fn map(&self, kind: NotifyableKind) -> &SafeNotifyableMap {
        self.maps.get(&kind).expect("all kinds registered")
    }

    /// Finds an interned notifyable of any kind.
    pub(crate) fn lookup_any(&self, notifyable_key: &str) -> Option<Arc<NotifyableInner>> {
        self.maps.values().find_map(|m| m.get(notifyable_key))
    }

    /// Resolves arbitrary key components to `(kind, canonical key)`, using
    /// each type's resolution hook.
    pub(crate) fn resolve_components(
        &self,
        components: &[&str],
        elements: usize,
    ) -> Option<(NotifyableKind, String)> {
        self.types
            .iter()
            .find_map(|t| t.components_to_key(components, elements).map(|k| (t.kind(), k)))
    }
}
