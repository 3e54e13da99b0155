// src/core/store/memory.rs

//! An in-process implementation of the store contract.
//!
//! `MemoryEnsemble` plays the part of the coordination ensemble: multiple
//! sessions connect to one ensemble, watches are one-shot, sequence creates
//! get ten-digit suffixes, and ephemerals vanish with their session.  It
//! exists so the library's own tests (and downstream users' tests) can run
//! the full stack without a live ensemble; it is not a production client.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::constants::SEQUENCE_NUMBER_SIZE;
use crate::core::store::{
    CreateMode, DataStore, SessionState, Stat, StoreError, StoreEvent, StoreEventKind, StoreResult,
};

#[derive(Debug)]
struct MemNode {
    data: Bytes,
    czxid: i64,
    mzxid: i64,
    ctime: i64,
    mtime: i64,
    version: i32,
    cversion: i32,
    pzxid: i64,
    ephemeral_owner: u64,
    next_sequence: u64,
}

#[derive(Debug, Default)]
struct WatchSet {
    data: HashSet<u64>,
    exists: HashSet<u64>,
    children: HashSet<u64>,
}

impl WatchSet {
    fn is_empty(&self) -> bool {
        self.data.is_empty() && self.exists.is_empty() && self.children.is_empty()
    }
}

#[derive(Debug)]
struct SessionRec {
    tx: mpsc::UnboundedSender<StoreEvent>,
    alive: bool,
}

#[derive(Debug, Default)]
struct EnsembleInner {
    nodes: BTreeMap<String, MemNode>,
    watches: HashMap<String, WatchSet>,
    sessions: HashMap<u64, SessionRec>,
}

/// A shared in-process ensemble.  Cheap to clone via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryEnsemble {
    inner: Mutex<EnsembleInner>,
    next_session_id: AtomicU64,
    next_zxid: AtomicI64,
}

impl MemoryEnsemble {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a new session against this ensemble.
    pub fn connect(self: &Arc<Self>) -> Arc<MemoryStore> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StoreEvent {
            path: String::new(),
            kind: StoreEventKind::Session(SessionState::Connected),
        });
        self.inner
            .lock()
            .sessions
            .insert(session_id, SessionRec { tx, alive: true });
        debug!(session_id, "memory store session opened");
        Arc::new(MemoryStore {
            ensemble: self.clone(),
            session_id,
            events: Mutex::new(Some(rx)),
        })
    }

    /// Test hook: expires a session as the ensemble would after a missed
    /// heartbeat deadline, deleting its ephemerals and firing their watches.
    pub fn expire_session(&self, session_id: u64) {
        let mut inner = self.inner.lock();
        self.drop_session_ephemerals(&mut inner, session_id);
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.alive = false;
            let _ = session.tx.send(StoreEvent {
                path: String::new(),
                kind: StoreEventKind::Session(SessionState::Expired),
            });
        }
        debug!(session_id, "memory store session expired");
    }

    fn zxid(&self) -> i64 {
        self.next_zxid.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn now_msecs() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn parent_of(path: &str) -> Option<&str> {
        let idx = path.rfind('/')?;
        if idx == 0 { Some("/") } else { Some(&path[..idx]) }
    }

    fn validate_path(path: &str) -> StoreResult<()> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(StoreError::BadPath(path.to_string()));
        }
        if path.len() > 1 && path[1..].split('/').any(str::is_empty) {
            return Err(StoreError::BadPath(path.to_string()));
        }
        Ok(())
    }

    fn child_names(inner: &EnsembleInner, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        inner
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect()
    }

    fn stat_of(inner: &EnsembleInner, path: &str, node: &MemNode) -> Stat {
        Stat {
            czxid: node.czxid,
            mzxid: node.mzxid,
            ctime: node.ctime,
            mtime: node.mtime,
            version: node.version,
            cversion: node.cversion,
            aversion: 0,
            ephemeral_owner: node.ephemeral_owner,
            data_length: node.data.len() as i32,
            num_children: Self::child_names(inner, path).len() as i32,
            pzxid: node.pzxid,
        }
    }

    /// Fires and clears the selected one-shot watch sets for `path`.
    fn fire_watches(
        inner: &mut EnsembleInner,
        path: &str,
        kind: StoreEventKind,
        data_and_exists: bool,
        children: bool,
    ) {
        let Some(set) = inner.watches.get_mut(path) else {
            return;
        };
        let mut targets: HashSet<u64> = HashSet::new();
        if data_and_exists {
            targets.extend(set.data.drain());
            targets.extend(set.exists.drain());
        }
        if children {
            targets.extend(set.children.drain());
        }
        if set.is_empty() {
            inner.watches.remove(path);
        }
        for session_id in targets {
            if let Some(session) = inner.sessions.get(&session_id)
                && session.alive
            {
                let _ = session.tx.send(StoreEvent {
                    path: path.to_string(),
                    kind: kind.clone(),
                });
            }
        }
    }

    fn delete_node_locked(&self, inner: &mut EnsembleInner, path: &str) {
        inner.nodes.remove(path);
        Self::fire_watches(inner, path, StoreEventKind::NodeDeleted, true, true);
        if let Some(parent) = Self::parent_of(path) {
            let zxid = self.zxid();
            if let Some(parent_node) = inner.nodes.get_mut(parent) {
                parent_node.cversion += 1;
                parent_node.pzxid = zxid;
            }
            Self::fire_watches(
                inner,
                parent,
                StoreEventKind::NodeChildrenChanged,
                false,
                true,
            );
        }
    }

    fn drop_session_ephemerals(&self, inner: &mut EnsembleInner, session_id: u64) {
        let owned: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == session_id)
            .map(|(k, _)| k.clone())
            .collect();
        for path in owned {
            self.delete_node_locked(inner, &path);
        }
    }

    fn check_session(inner: &EnsembleInner, session_id: u64) -> StoreResult<()> {
        match inner.sessions.get(&session_id) {
            Some(s) if s.alive => Ok(()),
            Some(_) => Err(StoreError::SessionExpired),
            None => Err(StoreError::ConnectionLoss),
        }
    }
}

/// One session's handle onto a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemoryStore {
    ensemble: Arc<MemoryEnsemble>,
    session_id: u64,
    events: Mutex<Option<mpsc::UnboundedReceiver<StoreEvent>>>,
}

impl MemoryStore {
    pub fn ensemble(&self) -> &Arc<MemoryEnsemble> {
        &self.ensemble
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> StoreResult<String> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;

        let parent = MemoryEnsemble::parent_of(path)
            .ok_or_else(|| StoreError::BadPath(path.to_string()))?
            .to_string();
        let mut actual_path = path.to_string();
        if parent != "/" {
            let parent_node = inner
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| StoreError::NoNode(parent.clone()))?;
            if parent_node.ephemeral_owner != 0 {
                return Err(StoreError::NoChildrenForEphemerals(parent.clone()));
            }
            if mode.is_sequential() {
                let seq = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                actual_path = format!("{path}{seq:0width$}", width = SEQUENCE_NUMBER_SIZE);
            }
        } else if mode.is_sequential() {
            return Err(StoreError::BadPath(path.to_string()));
        }

        if inner.nodes.contains_key(&actual_path) {
            return Err(StoreError::NodeExists(actual_path));
        }

        let zxid = self.ensemble.zxid();
        let now = MemoryEnsemble::now_msecs();
        inner.nodes.insert(
            actual_path.clone(),
            MemNode {
                data,
                czxid: zxid,
                mzxid: zxid,
                ctime: now,
                mtime: now,
                version: 0,
                cversion: 0,
                pzxid: zxid,
                ephemeral_owner: if mode.is_ephemeral() {
                    self.session_id
                } else {
                    0
                },
                next_sequence: 0,
            },
        );
        if let Some(parent_node) = inner.nodes.get_mut(&parent) {
            parent_node.cversion += 1;
            parent_node.pzxid = zxid;
        }
        MemoryEnsemble::fire_watches(inner, &actual_path, StoreEventKind::NodeCreated, true, false);
        MemoryEnsemble::fire_watches(
            inner,
            &parent,
            StoreEventKind::NodeChildrenChanged,
            false,
            true,
        );
        Ok(actual_path)
    }

    async fn delete(&self, path: &str, version: i32) -> StoreResult<()> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if version != -1 && version != node.version {
            return Err(StoreError::BadVersion(path.to_string()));
        }
        if !MemoryEnsemble::child_names(inner, path).is_empty() {
            return Err(StoreError::NotEmpty(path.to_string()));
        }
        self.ensemble.delete_node_locked(inner, path);
        Ok(())
    }

    async fn exists(&self, path: &str, watch: bool) -> StoreResult<Option<Stat>> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;
        let found = inner
            .nodes
            .get(path)
            .map(|n| MemoryEnsemble::stat_of(inner, path, n));
        if watch {
            let set = inner.watches.entry(path.to_string()).or_default();
            if found.is_some() {
                set.data.insert(self.session_id);
            } else {
                set.exists.insert(self.session_id);
            }
        }
        Ok(found)
    }

    async fn get(&self, path: &str, watch: bool) -> StoreResult<(Bytes, Stat)> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        let result = (node.data.clone(), MemoryEnsemble::stat_of(inner, path, node));
        if watch {
            inner
                .watches
                .entry(path.to_string())
                .or_default()
                .data
                .insert(self.session_id);
        }
        Ok(result)
    }

    async fn set(&self, path: &str, data: Bytes, version: i32) -> StoreResult<Stat> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;
        let zxid = self.ensemble.zxid();
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if version != -1 && version != node.version {
            return Err(StoreError::BadVersion(path.to_string()));
        }
        node.data = data;
        node.version += 1;
        node.mzxid = zxid;
        node.mtime = MemoryEnsemble::now_msecs();
        let stat = {
            let node = inner.nodes.get(path).expect("just updated");
            MemoryEnsemble::stat_of(inner, path, node)
        };
        MemoryEnsemble::fire_watches(inner, path, StoreEventKind::NodeDataChanged, true, false);
        Ok(stat)
    }

    async fn get_children(&self, path: &str, watch: bool) -> StoreResult<Vec<String>> {
        MemoryEnsemble::validate_path(path)?;
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        MemoryEnsemble::check_session(inner, self.session_id)?;
        if path != "/" && !inner.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        if watch {
            inner
                .watches
                .entry(path.to_string())
                .or_default()
                .children
                .insert(self.session_id);
        }
        Ok(MemoryEnsemble::child_names(inner, path))
    }

    async fn sync(&self, _path: &str) -> StoreResult<()> {
        let inner = self.ensemble.inner.lock();
        MemoryEnsemble::check_session(&inner, self.session_id)?;
        // Single-copy ensemble: reads already observe all prior writes.
        Ok(())
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<StoreEvent>> {
        self.events.lock().take()
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn is_connected(&self) -> bool {
        let inner = self.ensemble.inner.lock();
        inner
            .sessions
            .get(&self.session_id)
            .is_some_and(|s| s.alive)
    }

    async fn close(&self) {
        let mut inner = self.ensemble.inner.lock();
        let inner = &mut *inner;
        self.ensemble
            .drop_session_ephemerals(inner, self.session_id);
        if let Some(session) = inner.sessions.get_mut(&self.session_id) {
            session.alive = false;
            let _ = session.tx.send(StoreEvent {
                path: String::new(),
                kind: StoreEventKind::Session(SessionState::Closed),
            });
        }
        debug!(session_id = self.session_id, "memory store session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn create_get_set_delete_cycle() {
        let ensemble = MemoryEnsemble::new();
        let store = ensemble.connect();
        store
            .create("/a", b("one"), CreateMode::Persistent)
            .await
            .unwrap();
        let (data, stat) = store.get("/a", false).await.unwrap();
        assert_eq!(data, b("one"));
        assert_eq!(stat.version, 0);

        let stat = store.set("/a", b("two"), 0).await.unwrap();
        assert_eq!(stat.version, 1);
        assert_eq!(
            store.set("/a", b("three"), 0).await.unwrap_err(),
            StoreError::BadVersion("/a".into())
        );

        store.delete("/a", 1).await.unwrap();
        assert!(store.exists("/a", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sequence_names_are_ten_digits_and_monotonic() {
        let ensemble = MemoryEnsemble::new();
        let store = ensemble.connect();
        store
            .create("/q", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let first = store
            .create("/q/element_", b("x"), CreateMode::PersistentSequential)
            .await
            .unwrap();
        let second = store
            .create("/q/element_", b("y"), CreateMode::PersistentSequential)
            .await
            .unwrap();
        assert_eq!(first, "/q/element_0000000000");
        assert_eq!(second, "/q/element_0000000001");
    }

    #[tokio::test]
    async fn watches_are_one_shot() {
        let ensemble = MemoryEnsemble::new();
        let store = ensemble.connect();
        let mut events = store.take_event_stream().unwrap();
        // Drain the connected event.
        assert!(matches!(
            events.recv().await.unwrap().kind,
            StoreEventKind::Session(SessionState::Connected)
        ));

        store
            .create("/w", b("v"), CreateMode::Persistent)
            .await
            .unwrap();
        store.get("/w", true).await.unwrap();
        store.set("/w", b("v2"), -1).await.unwrap();
        store.set("/w", b("v3"), -1).await.unwrap();

        let fired = events.recv().await.unwrap();
        assert_eq!(fired.path, "/w");
        assert_eq!(fired.kind, StoreEventKind::NodeDataChanged);
        // The second set must not fire the already-consumed watch.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_expiry_removes_ephemerals_and_fires_watchers() {
        let ensemble = MemoryEnsemble::new();
        let owner = ensemble.connect();
        let observer = ensemble.connect();
        let mut observer_events = observer.take_event_stream().unwrap();
        observer_events.recv().await.unwrap(); // connected

        owner
            .create("/locks", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let bid = owner
            .create("/locks/bid_", Bytes::new(), CreateMode::EphemeralSequential)
            .await
            .unwrap();
        observer.exists(&bid, true).await.unwrap();

        ensemble.expire_session(owner.session_id());
        let fired = observer_events.recv().await.unwrap();
        assert_eq!(fired.path, bid);
        assert_eq!(fired.kind, StoreEventKind::NodeDeleted);
        assert!(observer.exists(&bid, false).await.unwrap().is_none());
        assert!(!owner.is_connected());
    }

    #[tokio::test]
    async fn delete_with_children_fails() {
        let ensemble = MemoryEnsemble::new();
        let store = ensemble.connect();
        store
            .create("/p", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        store
            .create("/p/c", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(
            store.delete("/p", -1).await.unwrap_err(),
            StoreError::NotEmpty("/p".into())
        );
    }
}
