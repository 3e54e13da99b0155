// src/core/notifyable/base.rs

//! Shared machinery behind the notifyable traits: child enumeration and
//! access, ancestor navigation, lock plumbing, and removal.
//!
//! Structural changes (child create/remove) are guarded by the parent's
//! distributed child lock; lock ordering is always distributed lock, then
//! child lock, then attribute mutex, never the reverse.

use tracing::{debug, warn};

use crate::core::constants::{
    APP_COMPONENTS_COUNT, APPLICATION_DIR, GROUP_DIR, ROOT_COMPONENTS_COUNT,
};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::key;
use crate::core::locks::{DistributedLockMode, LockName};
use crate::core::notifyable::{
    AccessType, Application, Group, Handle, NotifyableHandle, NotifyableKind,
};
use crate::core::store::StoreError;

pub(crate) async fn child_names(h: &Handle, dir: &'static str) -> Result<Vec<String>> {
    h.inner.ensure_ready()?;
    h.ops.ensure_connected()?;
    let path = format!("{}/{dir}", h.inner.key);
    match h.ops.store().get_children(&path, true).await {
        Ok(mut names) => {
            names.sort();
            Ok(names)
        }
        Err(StoreError::NoNode(_)) => Err(ClusterlibError::inconsistent(format!(
            "required child directory missing: {path}"
        ))),
        Err(e) => Err(ClusterlibError::from_store(e, "list children")),
    }
}

pub(crate) async fn get_child(
    h: &Handle,
    kind: NotifyableKind,
    name: &str,
    access: AccessType,
) -> Result<Option<Handle>> {
    h.inner.ensure_ready()?;
    let inner = h.ops.get_child(&h.inner, kind, name, access).await?;
    Ok(inner.map(|inner| Handle {
        ops: h.ops.clone(),
        inner,
    }))
}

pub(crate) async fn parent(h: &Handle) -> Result<Option<NotifyableHandle>> {
    h.inner.ensure_ready()?;
    let Some(parent_key) = key::parent_key(&h.inner.key) else {
        return Ok(None);
    };
    let inner = h
        .ops
        .notifyable_by_key(&parent_key, AccessType::LoadFromRepository)
        .await?;
    Ok(inner.map(|inner| {
        NotifyableHandle::wrap(Handle {
            ops: h.ops.clone(),
            inner,
        })
    }))
}

/// Walks the key prefix up to the enclosing Application, if there is one.
pub(crate) async fn my_application(h: &Handle) -> Result<Option<Application>> {
    h.inner.ensure_ready()?;
    let components = key::split(&h.inner.key);
    if components.len() < APP_COMPONENTS_COUNT
        || components[ROOT_COMPONENTS_COUNT] != APPLICATION_DIR
    {
        return Ok(None);
    }
    let app_key = key::join(&components, APP_COMPONENTS_COUNT);
    let inner = h
        .ops
        .notifyable_by_key(&app_key, AccessType::LoadFromRepository)
        .await?;
    Ok(inner.map(|inner| Application {
        h: Handle {
            ops: h.ops.clone(),
            inner,
        },
    }))
}

/// Finds the nearest enclosing Group on the key path, if any.
pub(crate) async fn my_group(h: &Handle) -> Result<Option<Group>> {
    h.inner.ensure_ready()?;
    let components = key::split(&h.inner.key);
    // Scan prefixes from the nearest ancestor inward; a group key has its
    // terminal directory component equal to the groups dir.
    let mut elements = components.len().saturating_sub(2);
    while elements > ROOT_COMPONENTS_COUNT {
        if components[elements - 2] == GROUP_DIR {
            let group_key = key::join(&components, elements);
            let inner = h
                .ops
                .notifyable_by_key(&group_key, AccessType::LoadFromRepository)
                .await?;
            return Ok(inner.map(|inner| Group {
                h: Handle {
                    ops: h.ops.clone(),
                    inner,
                },
            }));
        }
        elements -= 2;
    }
    Ok(None)
}

pub(crate) async fn acquire_lock(
    h: &Handle,
    lock_name: LockName,
    mode: DistributedLockMode,
    msec_timeout: i64,
) -> Result<()> {
    h.inner.ensure_ready()?;
    if h.inner.kind == NotifyableKind::Root && lock_name != LockName::Child {
        return Err(ClusterlibError::invalid_method(
            "the root notifyable cannot be user-locked",
        ));
    }
    h.ops
        .locks()
        .acquire(&h.ops, &h.inner.key, lock_name, mode, msec_timeout)
        .await
}

/// Acquires the lock on this notifyable and every descendant, pre-order.
/// On any failure the locks acquired so far are released in reverse.
pub(crate) async fn acquire_lock_recursive(
    h: &Handle,
    lock_name: LockName,
    mode: DistributedLockMode,
    msec_timeout: i64,
) -> Result<()> {
    acquire_lock(h, lock_name, mode, msec_timeout).await?;
    let mut acquired = vec![h.inner.key.clone()];
    let result = async {
        let mut stack = child_notifyable_entries(h, h.inner.kind, &h.inner.key).await?;
        while let Some((kind, ntf_key)) = stack.pop() {
            h.ops
                .locks()
                .acquire(&h.ops, &ntf_key, lock_name, mode, msec_timeout)
                .await?;
            acquired.push(ntf_key.clone());
            stack.extend(child_notifyable_entries(h, kind, &ntf_key).await?);
        }
        Ok(())
    }
    .await;
    if result.is_err() {
        for ntf_key in acquired.iter().rev() {
            if let Err(e) = h.ops.locks().release(&h.ops, ntf_key, lock_name).await {
                warn!(key = %ntf_key, error = %e, "failed to unwind recursive lock");
            }
        }
    }
    result
}

/// Releases the lock on this notifyable and every descendant still held.
pub(crate) async fn release_lock_recursive(h: &Handle, lock_name: LockName) -> Result<()> {
    let mut keys = vec![(h.inner.kind, h.inner.key.clone())];
    let mut i = 0;
    while i < keys.len() {
        let (kind, ntf_key) = keys[i].clone();
        keys.extend(child_notifyable_entries(h, kind, &ntf_key).await?);
        i += 1;
    }
    for (_, ntf_key) in keys.iter().rev() {
        if h.ops.locks().has_lock(ntf_key, lock_name).is_some()
            && let Err(e) = h.ops.locks().release(&h.ops, ntf_key, lock_name).await
        {
            warn!(key = %ntf_key, error = %e, "failed to release recursive lock");
        }
    }
    Ok(())
}

/// Keys and kinds of the immediate child notifyables present in the
/// repository.
pub(crate) async fn child_notifyable_entries(
    h: &Handle,
    kind: NotifyableKind,
    ntf_key: &str,
) -> Result<Vec<(NotifyableKind, String)>> {
    let mut entries = Vec::new();
    for (dir, child_kind) in crate::core::notifyable::allowed_child_dirs(kind) {
        let path = format!("{ntf_key}/{dir}");
        match h.ops.store().get_children(&path, false).await {
            Ok(names) => {
                for name in names {
                    entries.push((*child_kind, format!("{path}/{name}")));
                }
            }
            Err(StoreError::NoNode(_)) => continue,
            Err(e) => return Err(ClusterlibError::from_store(e, "list child notifyables")),
        }
    }
    Ok(entries)
}

pub(crate) async fn remove(h: &Handle, recursive: bool) -> Result<()> {
    h.inner.ensure_ready()?;
    h.ops.ensure_connected()?;
    if h.inner.kind == NotifyableKind::Root {
        return Err(ClusterlibError::invalid_method("the root cannot be removed"));
    }
    let parent_key = key::parent_key(&h.inner.key).ok_or_else(|| {
        ClusterlibError::inconsistent(format!("notifyable without parent: {}", h.inner.key))
    })?;

    h.ops
        .locks()
        .acquire(
            &h.ops,
            &parent_key,
            LockName::Child,
            DistributedLockMode::Excl,
            -1,
        )
        .await?;
    let result = async {
        h.ops
            .locks()
            .acquire(
                &h.ops,
                &h.inner.key,
                LockName::Notifyable,
                DistributedLockMode::Excl,
                -1,
            )
            .await?;
        let removed = remove_guarded(h, recursive).await;
        if let Err(e) = h
            .ops
            .locks()
            .release(&h.ops, &h.inner.key, LockName::Notifyable)
            .await
        {
            debug!(key = %h.inner.key, error = %e, "notifyable lock release after remove");
        }
        removed
    }
    .await;
    if let Err(e) = h.ops.locks().release(&h.ops, &parent_key, LockName::Child).await {
        warn!(parent = %parent_key, error = %e, "failed to release child lock after remove");
    }
    result
}

async fn remove_guarded(h: &Handle, recursive: bool) -> Result<()> {
    let children = child_notifyable_entries(h, h.inner.kind, &h.inner.key).await?;
    if !children.is_empty() && !recursive {
        return Err(ClusterlibError::invalid_arguments(format!(
            "{} has children and recursive removal was not requested",
            h.inner.key
        )));
    }
    remove_tree(h, h.inner.kind, h.inner.key.clone()).await
}

/// Removes one notifyable and (pre-order) every descendant, deleting
/// leafwards.  The child lock taken on each subtree root keeps concurrent
/// creators out while its descendants disappear.
async fn remove_tree(h: &Handle, kind: NotifyableKind, ntf_key: String) -> Result<()> {
    Box::pin(async move {
        h.ops
            .locks()
            .acquire(&h.ops, &ntf_key, LockName::Child, DistributedLockMode::Excl, -1)
            .await?;
        let result = async {
            let children = child_notifyable_entries(h, kind, &ntf_key).await?;
            for (child_kind, child_key) in children {
                remove_tree(h, child_kind, child_key).await?;
            }
            delete_subtree_paths(h, &ntf_key).await
        }
        .await;
        // The bid node was deleted with the subtree; release just clears
        // the in-process refcount.
        if let Err(e) = h.ops.locks().release(&h.ops, &ntf_key, LockName::Child).await {
            debug!(key = %ntf_key, error = %e, "child lock release after subtree delete");
        }
        h.ops.forget_notifyable(&ntf_key);
        result
    })
    .await
}

/// Deletes every store node under `root_path` (inclusive), children first.
async fn delete_subtree_paths(h: &Handle, root_path: &str) -> Result<()> {
    let mut ordered = vec![root_path.to_string()];
    let mut i = 0;
    while i < ordered.len() {
        let path = ordered[i].clone();
        match h.ops.store().get_children(&path, false).await {
            Ok(names) => ordered.extend(names.into_iter().map(|n| format!("{path}/{n}"))),
            Err(StoreError::NoNode(_)) => {}
            Err(e) => return Err(ClusterlibError::from_store(e, "scan subtree")),
        }
        i += 1;
    }
    for path in ordered.iter().rev() {
        match h.ops.store().delete(path, -1).await {
            Ok(()) | Err(StoreError::NoNode(_)) => {}
            Err(e) => return Err(ClusterlibError::from_store(e, "delete subtree node")),
        }
    }
    Ok(())
}
