// src/core/key.rs

//! Repository key parsing and construction.
//!
//! Every notifyable lives at a key of the form
//! `/clusterlib/1.0/root/applications/<A>/groups/<G>/...`; a key is split
//! into components on the key separator, so the first component of a valid
//! key is always the empty string.

use crate::core::constants::{
    APP_INDEX, APP_NAME_INDEX, APPLICATION_DIR, CLUSTERLIB, CLUSTERLIB_INDEX, CLUSTERLIB_VERSION,
    KEY_SEPARATOR, ROOT_COMPONENTS_COUNT, ROOT_DIR, ROOT_INDEX, VERSION_NAME_INDEX,
};
use crate::core::errors::{ClusterlibError, Result};

/// The key of the single Root notifyable.
pub fn root_key() -> String {
    format!("{KEY_SEPARATOR}{CLUSTERLIB}{KEY_SEPARATOR}{CLUSTERLIB_VERSION}{KEY_SEPARATOR}{ROOT_DIR}")
}

/// Splits a key into components.  A well-formed key yields an empty first
/// component ("/a/b" -> ["", "a", "b"]).
pub fn split(key: &str) -> Vec<&str> {
    key.split(KEY_SEPARATOR).collect()
}

/// Joins the first `elements` components back into a key.
pub fn join(components: &[&str], elements: usize) -> String {
    components[..elements.min(components.len())].join(KEY_SEPARATOR)
}

/// Appends a child directory and name to a parent key.
pub fn child_key(parent_key: &str, dir: &str, name: &str) -> String {
    format!("{parent_key}{KEY_SEPARATOR}{dir}{KEY_SEPARATOR}{name}")
}

/// The terminal component of a key.
pub fn name_of(key: &str) -> &str {
    key.rsplit(KEY_SEPARATOR).next().unwrap_or(key)
}

/// The parent notifyable's key, skipping the interposed child directory.
/// Returns `None` for the Root key and anything shorter.
pub fn parent_key(key: &str) -> Option<String> {
    let components = split(key);
    if components.len() < ROOT_COMPONENTS_COUNT + 2 {
        return None;
    }
    Some(join(&components, components.len() - 2))
}

/// True iff the first `ROOT_COMPONENTS_COUNT` components spell the fixed
/// clusterlib prefix.
pub fn has_clusterlib_prefix(components: &[&str]) -> bool {
    components.len() >= ROOT_COMPONENTS_COUNT
        && components[0].is_empty()
        && components[CLUSTERLIB_INDEX] == CLUSTERLIB
        && components[VERSION_NAME_INDEX] == CLUSTERLIB_VERSION
        && components[ROOT_INDEX] == ROOT_DIR
}

/// True iff `components[..elements]` is exactly the Root key.
pub fn is_root_key(components: &[&str], elements: usize) -> bool {
    elements == ROOT_COMPONENTS_COUNT && has_clusterlib_prefix(components)
}

/// True iff `components[..elements]` is exactly an Application key.
pub fn is_application_key(components: &[&str], elements: usize) -> bool {
    elements == APP_NAME_INDEX + 1
        && has_clusterlib_prefix(components)
        && components[APP_INDEX] == APPLICATION_DIR
        && !components[APP_NAME_INDEX].is_empty()
}

/// Checks a notifyable name at the API boundary: non-empty, no key
/// separator, printable ASCII only.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ClusterlibError::invalid_arguments("empty name"));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(ClusterlibError::invalid_arguments(format!(
            "name '{name}' contains the key separator"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ClusterlibError::invalid_arguments(format!(
            "name '{name}' contains non-printable characters"
        )));
    }
    Ok(())
}
