// src/core/factory.rs

//! Factory and client lifecycle: bootstrap, the store-event loop, user
//! event dispatch, JSON-RPC client loops, synchronize, and shutdown.
//!
//! The factory owns everything process-wide: the store session, the
//! registered-type tables and intern maps, the distributed-lock wait map,
//! the cached-data routing index, the timer service, and one event queue
//! plus dispatcher task per client.  There are no singletons; all context
//! is threaded through [`FactoryOps`].

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClusterlibConfig;
use crate::core::blocking_queue::BlockingQueue;
use crate::core::cached::CachedAttr;
use crate::core::constants::{
    CURRENT_STATE_DIR, DESIRED_STATE_DIR, KEYVAL_NODE, LOCK_DIR, OWNERSHIP_LOCK,
    PROCESSINFO_NODE, PROCESSSLOTINFO_NODE, ROOT_COMPONENTS_COUNT, ROOT_DIR, SHARDS_NODE,
};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::events::{ClientEvent, EventMask, TimerEventHandler, UserEvent, UserEventHandler};
use crate::core::key;
use crate::core::locks::{DistributedLocks, LockName};
use crate::core::notifyable::{
    AccessType, Handle, Notifyable, NotifyableHandle, NotifyableInner, NotifyableKind, Queue,
    Root, allowed_child_dirs,
};
use crate::core::registry::Registry;
use crate::core::rpc::{
    InMemoryStatePersistence, MethodRegistry, PendingRpc, RpcRequestEnvelope, RpcResponseEnvelope,
    StatePersistence, id_key,
};
use crate::core::store::{CreateMode, DataStore, SessionState, StoreEvent, StoreEventKind, StoreError};
use crate::core::timer::{TimerId, TimerService};

/// Handler registration id within one client.
pub type HandlerId = u64;

pub(crate) struct CacheBinding {
    inner: std::sync::Weak<NotifyableInner>,
    attr: CachedAttr,
}

enum InternalRequest {
    /// Barrier: acknowledged once every earlier store event is routed.
    Sync(oneshot::Sender<()>),
    End,
}

struct RegisteredHandler {
    key: String,
    mask: EventMask,
    handler: Arc<dyn UserEventHandler>,
}

pub(crate) struct ClientCore {
    id: u64,
    queue: Arc<BlockingQueue<ClientEvent>>,
    handlers: DashMap<HandlerId, RegisteredHandler>,
    next_handler_id: AtomicU64,
}

/// Process-wide shared state behind every handle.
pub(crate) struct FactoryOps {
    store: Arc<dyn DataStore>,
    config: ClusterlibConfig,
    client_id: String,
    registry: Registry,
    locks: DistributedLocks,
    cache_index: DashMap<String, CacheBinding>,
    queue_watches: DashMap<String, watch::Sender<u64>>,
    clients: DashMap<u64, Arc<ClientCore>>,
    next_client_id: AtomicU64,
    timer: Arc<TimerService>,
    injector: mpsc::UnboundedSender<InternalRequest>,
    shutdown_tx: broadcast::Sender<()>,
    connected: AtomicBool,
    live: AtomicBool,
    root_bootstrap: tokio::sync::Mutex<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FactoryOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryOps")
            .field("client_id", &self.client_id)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl FactoryOps {
    pub(crate) fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &DistributedLocks {
        &self.locks
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn config(&self) -> &ClusterlibConfig {
        &self.config
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_live() && self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClusterlibError::connection_failure(
                "repository session is not connected",
            ))
        }
    }

    /// A receiver that changes whenever the element children of
    /// `queue_key` change.
    pub(crate) fn subscribe_queue_changes(&self, queue_key: &str) -> watch::Receiver<u64> {
        self.queue_watches
            .entry(queue_key.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn bump_queue(&self, queue_key: &str) {
        if let Some(sender) = self.queue_watches.get(queue_key) {
            sender.send_modify(|v| *v += 1);
        }
    }

    fn bump_all_queues(&self) {
        for sender in self.queue_watches.iter() {
            sender.send_modify(|v| *v += 1);
        }
    }

    /// Transitions an entity to `Removed` and drops it from the intern
    /// table and the cache-routing index.  The handle stays readable.
    pub(crate) fn forget_notifyable(&self, notifyable_key: &str) {
        if let Some(inner) = self.registry.lookup_any(notifyable_key) {
            inner.mark_removed();
            for (path, _) in inner.attr_paths() {
                self.cache_index.remove(&path);
            }
            self.registry.map(inner.kind).erase(notifyable_key);
        }
    }

    /// Bootstraps (idempotently) and interns the Root.
    pub(crate) async fn root_inner(&self) -> Result<Arc<NotifyableInner>> {
        let root_key = key::root_key();
        if let Some(existing) = self.registry.map(NotifyableKind::Root).get(&root_key) {
            return Ok(existing);
        }
        self.ensure_connected()?;
        let _guard = self.root_bootstrap.lock().await;
        if let Some(existing) = self.registry.map(NotifyableKind::Root).get(&root_key) {
            return Ok(existing);
        }
        // The fixed prefix above the root, then the root's own list.
        let components = key::split(&root_key);
        for elements in 2..ROOT_COMPONENTS_COUNT {
            self.create_idempotent(&key::join(&components, elements), Bytes::new())
                .await?;
        }
        let reg = self.registry.get(NotifyableKind::Root);
        for path in reg.generate_repository_list(ROOT_DIR, &root_key) {
            self.create_idempotent(&path, default_node_data(&path))
                .await?;
        }
        self.intern(NotifyableKind::Root, &root_key, ROOT_DIR).await
    }

    async fn create_idempotent(&self, path: &str, data: Bytes) -> Result<()> {
        match self.store.create(path, data, CreateMode::Persistent).await {
            Ok(_) | Err(StoreError::NodeExists(_)) => Ok(()),
            Err(e) => Err(ClusterlibError::from_store(e, "create repository node")),
        }
    }

    /// Looks up or materialises a child notifyable, guarded by the
    /// parent's distributed child lock (shared for loads, exclusive for
    /// creation).
    pub(crate) async fn get_child(
        &self,
        parent: &Arc<NotifyableInner>,
        kind: NotifyableKind,
        name: &str,
        access: AccessType,
    ) -> Result<Option<Arc<NotifyableInner>>> {
        let reg = self.registry.get(kind);
        if !reg.is_valid_name(name) {
            return Err(ClusterlibError::invalid_arguments(format!(
                "invalid {kind} name '{name}'"
            )));
        }
        let child_key = reg.generate_key(&parent.key, name);
        if let Some(existing) = self.registry.map(kind).get(&child_key) {
            return Ok(Some(existing));
        }
        if access == AccessType::CachedOnly {
            return Ok(None);
        }
        self.ensure_connected()?;
        let lock_mode = if access == AccessType::CreateIfNotFound {
            crate::core::locks::DistributedLockMode::Excl
        } else {
            crate::core::locks::DistributedLockMode::Shared
        };
        self.locks
            .acquire(self, &parent.key, LockName::Child, lock_mode, -1)
            .await?;
        let result = self.load_or_create(kind, &child_key, name, access).await;
        if let Err(e) = self.locks.release(self, &parent.key, LockName::Child).await {
            warn!(parent = %parent.key, error = %e, "failed to release child lock");
        }
        result
    }

    async fn load_or_create(
        &self,
        kind: NotifyableKind,
        child_key: &str,
        name: &str,
        access: AccessType,
    ) -> Result<Option<Arc<NotifyableInner>>> {
        let reg = self.registry.get(kind);
        let repository_list = reg.generate_repository_list(name, child_key);
        match access {
            AccessType::LoadFromRepository => {
                let head = self
                    .store
                    .exists(child_key, false)
                    .await
                    .map_err(|e| ClusterlibError::from_store(e, "check notifyable"))?;
                if head.is_none() {
                    return Ok(None);
                }
                for path in &repository_list[1..] {
                    let found = self
                        .store
                        .exists(path, false)
                        .await
                        .map_err(|e| ClusterlibError::from_store(e, "check notifyable"))?;
                    if found.is_none() {
                        return Err(ClusterlibError::inconsistent(format!(
                            "live notifyable {child_key} is missing required path {path}"
                        )));
                    }
                }
            }
            AccessType::CreateIfNotFound => {
                for path in &repository_list {
                    self.create_idempotent(path, default_node_data(path)).await?;
                }
                debug!(key = %child_key, %kind, "created notifyable repository objects");
            }
            AccessType::CachedOnly => unreachable!("handled by the caller"),
        }
        Ok(Some(self.intern(kind, child_key, name).await?))
    }

    /// Adds the handle to the intern table (a racing insert wins), wires
    /// its cached attributes into the routing index, and arms the
    /// structural watches.
    async fn intern(
        &self,
        kind: NotifyableKind,
        notifyable_key: &str,
        name: &str,
    ) -> Result<Arc<NotifyableInner>> {
        let reg = self.registry.get(kind);
        let fresh = Arc::new(reg.create_notifyable(notifyable_key, name));
        fresh
            .current_state
            .set_max_history_size(self.config.default_max_history_size);
        fresh
            .desired_state
            .set_max_history_size(self.config.default_max_history_size);
        let interned = self.registry.map(kind).unique_insert(fresh.clone());
        if Arc::ptr_eq(&interned, &fresh) {
            for (path, attr) in interned.attr_paths() {
                self.cache_index.insert(
                    path.clone(),
                    CacheBinding {
                        inner: Arc::downgrade(&interned),
                        attr,
                    },
                );
                // Initial load doubles as the first data-watch arm.
                if let Err(e) = interned.reload_attr(self, attr).await {
                    debug!(%path, error = %e, "initial cached data load failed");
                }
            }
            self.arm_structural_watches(&interned).await;
        }
        Ok(interned)
    }

    /// Arms the one-shot watches that keep an interned notifyable's
    /// existence, child listings, and lock directories observable.
    async fn arm_structural_watches(&self, inner: &Arc<NotifyableInner>) {
        let _ = self.store.exists(&inner.key, true).await;
        for (dir, _) in allowed_child_dirs(inner.kind) {
            let _ = self
                .store
                .get_children(&format!("{}/{dir}", inner.key), true)
                .await;
        }
        if inner.kind == NotifyableKind::Queue {
            let _ = self.store.get_children(&inner.key, true).await;
        }
        let locks_dir = format!("{}/{LOCK_DIR}", inner.key);
        if let Ok(lock_dirs) = self.store.get_children(&locks_dir, true).await {
            for dir in lock_dirs {
                let _ = self
                    .store
                    .get_children(&format!("{locks_dir}/{dir}"), true)
                    .await;
            }
        }
    }

    /// Resolves an arbitrary repository key to an interned notifyable,
    /// walking the hierarchy from the root with the requested access.
    pub(crate) async fn notifyable_by_key(
        &self,
        target_key: &str,
        access: AccessType,
    ) -> Result<Option<Arc<NotifyableInner>>> {
        let components = key::split(target_key);
        let Some((_, resolved)) = self
            .registry
            .resolve_components(&components, components.len())
        else {
            return Ok(None);
        };
        if access == AccessType::CachedOnly {
            return Ok(self.registry.lookup_any(&resolved));
        }
        let components = key::split(&resolved);
        let mut current = self.root_inner().await?;
        let mut i = ROOT_COMPONENTS_COUNT;
        while i + 1 < components.len() {
            let dir = components[i];
            let name = components[i + 1];
            let Some((_, child_kind)) = allowed_child_dirs(current.kind)
                .iter()
                .find(|(d, _)| *d == dir)
            else {
                return Ok(None);
            };
            match self.get_child(&current, *child_kind, name, access).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
            i += 2;
        }
        Ok(Some(current))
    }

    fn emit(&self, notifyable_key: &str, mask: EventMask) {
        if mask.is_empty() {
            return;
        }
        for client in self.clients.iter() {
            client.queue.put(ClientEvent::User(UserEvent {
                key: notifyable_key.to_string(),
                mask,
            }));
        }
    }

    async fn reload_and_emit(&self, path: &str) {
        let Some((weak, attr)) = self
            .cache_index
            .get(path)
            .map(|b| (b.inner.clone(), b.attr))
        else {
            return;
        };
        let Some(inner) = weak.upgrade() else {
            self.cache_index.remove(path);
            return;
        };
        if let Err(e) = inner.reload_attr(self, attr).await {
            debug!(%path, error = %e, "cached data reload after watch fire failed");
        }
        self.emit(&inner.key, attr_mask(inner.kind, attr));
    }

    async fn handle_children_changed(&self, path: &str) {
        if let Some(inner) = self.registry.lookup_any(path) {
            if inner.kind == NotifyableKind::Queue {
                self.bump_queue(path);
                let _ = self.store.get_children(path, true).await;
                self.emit(path, EventMask::QUEUE_CHILD_CHANGE);
            }
            return;
        }
        let components = key::split(path);
        let elements = components.len();
        if elements < 2 {
            return;
        }
        let last = components[elements - 1];

        // A lock-name directory appeared or vanished under `<owner>/locks`.
        if last == LOCK_DIR {
            let owner = key::join(&components, elements - 1);
            if self.registry.lookup_any(&owner).is_some() {
                if let Ok(lock_dirs) = self.store.get_children(path, true).await {
                    for dir in lock_dirs {
                        let _ = self.store.get_children(&format!("{path}/{dir}"), true).await;
                    }
                }
                self.emit(&owner, EventMask::LOCK_NODE_CHANGE);
            }
            return;
        }

        // Bid churn under `<owner>/locks/<lockName>`.
        if components[elements - 2] == LOCK_DIR {
            let owner = key::join(&components, elements - 2);
            if self.registry.lookup_any(&owner).is_some() {
                let _ = self.store.get_children(path, true).await;
                let mut mask = EventMask::LOCK_NODE_CHANGE;
                if last == OWNERSHIP_LOCK {
                    mask |= EventMask::LEADERSHIP_CHANGE;
                }
                self.emit(&owner, mask);
            }
            return;
        }

        // Membership churn under a typed child directory.
        if let Some(mask) = dir_mask(last) {
            let owner = key::join(&components, elements - 1);
            if self.registry.lookup_any(&owner).is_some() {
                let _ = self.store.get_children(path, true).await;
                self.emit(&owner, mask);
            }
        }
    }

    async fn handle_store_event(&self, event: StoreEvent) {
        match event.kind {
            StoreEventKind::Session(state) => self.handle_session_event(state),
            StoreEventKind::NodeDeleted => {
                self.locks.signal_deleted(&event.path);
                if self.registry.lookup_any(&event.path).is_some() {
                    self.forget_notifyable(&event.path);
                    self.emit(&event.path, EventMask::DELETED);
                }
            }
            StoreEventKind::NodeCreated => {
                if self.cache_index.contains_key(&event.path) {
                    self.reload_and_emit(&event.path).await;
                } else if self.registry.lookup_any(&event.path).is_some() {
                    let _ = self.store.exists(&event.path, true).await;
                    self.emit(&event.path, EventMask::CREATED);
                }
            }
            StoreEventKind::NodeDataChanged => {
                self.reload_and_emit(&event.path).await;
            }
            StoreEventKind::NodeChildrenChanged => {
                self.handle_children_changed(&event.path).await;
            }
        }
    }

    fn handle_session_event(&self, state: SessionState) {
        match state {
            SessionState::Connected => {
                info!("repository session connected");
                self.connected.store(true, Ordering::SeqCst);
            }
            SessionState::Disconnected => {
                warn!("repository session disconnected");
                self.connected.store(false, Ordering::SeqCst);
            }
            SessionState::Expired | SessionState::Closed => {
                self.connected.store(false, Ordering::SeqCst);
                if self.live.swap(false, Ordering::SeqCst) {
                    warn!("repository session ended ({state}); releasing all waiters");
                    self.release_all_waiters();
                }
            }
        }
    }

    /// Fails lock waits, wakes queue takers, and sends the end event to
    /// every client dispatcher.
    fn release_all_waiters(&self) {
        self.locks.invalidate_all();
        self.bump_all_queues();
        for client in self.clients.iter() {
            client.queue.put(ClientEvent::End);
        }
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut store_events: mpsc::UnboundedReceiver<StoreEvent>,
        mut injected: mpsc::UnboundedReceiver<InternalRequest>,
    ) {
        info!("factory event loop started");
        loop {
            tokio::select! {
                // Store events drain first so a sync barrier observes them.
                biased;
                event = store_events.recv() => match event {
                    Some(event) => self.handle_store_event(event).await,
                    None => {
                        self.live.store(false, Ordering::SeqCst);
                        self.release_all_waiters();
                        break;
                    }
                },
                request = injected.recv() => match request {
                    Some(InternalRequest::Sync(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(InternalRequest::End) | None => {
                        self.live.store(false, Ordering::SeqCst);
                        self.release_all_waiters();
                        break;
                    }
                },
            }
        }
        info!("factory event loop ended");
    }
}

fn default_node_data(path: &str) -> Bytes {
    let default: &[u8] = if path.ends_with(CURRENT_STATE_DIR)
        || path.ends_with(DESIRED_STATE_DIR)
        || path.ends_with(SHARDS_NODE)
    {
        b"[]"
    } else if path.ends_with(KEYVAL_NODE) {
        b"{}"
    } else if path.ends_with(PROCESSINFO_NODE) {
        b"[[],[]]"
    } else if path.ends_with(PROCESSSLOTINFO_NODE) {
        b"[false,0]"
    } else {
        b""
    };
    Bytes::from_static(default)
}

fn attr_mask(kind: NotifyableKind, attr: CachedAttr) -> EventMask {
    match attr {
        CachedAttr::CurrentState => {
            if kind == NotifyableKind::Node {
                EventMask::CURRENT_STATE_CHANGE | EventMask::CLIENT_STATE_CHANGE
            } else {
                EventMask::CURRENT_STATE_CHANGE
            }
        }
        CachedAttr::DesiredState => {
            if kind == NotifyableKind::Node {
                EventMask::DESIRED_STATE_CHANGE | EventMask::MASTER_STATE_CHANGE
            } else {
                EventMask::DESIRED_STATE_CHANGE
            }
        }
        CachedAttr::KeyValues => EventMask::PROPERTY_LIST_VALUES_CHANGE,
        CachedAttr::Shards => EventMask::SHARDS_CHANGE,
        CachedAttr::ProcessInfo => EventMask::PROCESS_SLOT_PROCESS_INFO_CHANGE,
        CachedAttr::ProcessSlotInfo => EventMask::PROCESS_SLOT_INFO_CHANGE,
    }
}

fn dir_mask(dir: &str) -> Option<EventMask> {
    use crate::core::constants::*;
    match dir {
        d if d == APPLICATION_DIR => Some(EventMask::APPLICATIONS_CHANGE),
        d if d == GROUP_DIR => Some(EventMask::GROUPS_CHANGE),
        d if d == NODE_DIR => Some(EventMask::NODES_CHANGE),
        d if d == PROCESSSLOT_DIR => Some(EventMask::PROCESS_SLOTS_CHANGE),
        d if d == DATADISTRIBUTION_DIR => Some(EventMask::DISTRIBUTIONS_CHANGE),
        d if d == PROPERTYLIST_DIR => Some(EventMask::PROPERTY_LISTS_CHANGE),
        d if d == QUEUE_DIR => Some(EventMask::QUEUES_CHANGE),
        _ => None,
    }
}

/// Entry point: one factory per store session.
#[derive(Clone, Debug)]
pub struct Factory {
    pub(crate) ops: Arc<FactoryOps>,
}

impl Factory {
    /// Connects the library to an already-opened store session and starts
    /// the event loop and timer service.
    pub async fn connect(store: Arc<dyn DataStore>, config: ClusterlibConfig) -> Result<Self> {
        config.validate()?;
        let store_events = store.take_event_stream().ok_or_else(|| {
            ClusterlibError::invalid_arguments("the store's event stream was already taken")
        })?;
        let (injector, injected_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);
        let client_id = format!(
            "{}.{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        );
        let ops = Arc::new(FactoryOps {
            connected: AtomicBool::new(store.is_connected()),
            store,
            config,
            client_id,
            registry: Registry::new(),
            locks: DistributedLocks::default(),
            cache_index: DashMap::new(),
            queue_watches: DashMap::new(),
            clients: DashMap::new(),
            next_client_id: AtomicU64::new(0),
            timer: TimerService::new(),
            injector,
            shutdown_tx,
            live: AtomicBool::new(true),
            root_bootstrap: tokio::sync::Mutex::new(()),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let event_loop = tokio::spawn(ops.clone().run_event_loop(store_events, injected_rx));
        let timer_task = tokio::spawn(
            ops.timer
                .clone()
                .run(ops.shutdown_tx.subscribe()),
        );
        ops.tasks.lock().extend([event_loop, timer_task]);
        info!(client_id = %ops.client_id, "factory connected");
        Ok(Self { ops })
    }

    /// The root of the hierarchy, bootstrapped on first access.
    pub async fn get_root(&self) -> Result<Root> {
        let inner = self.ops.root_inner().await?;
        Ok(Root {
            h: Handle {
                ops: self.ops.clone(),
                inner,
            },
        })
    }

    /// Resolves an arbitrary repository key to a typed handle.
    pub async fn notifyable_from_key(
        &self,
        notifyable_key: &str,
        access: AccessType,
    ) -> Result<Option<NotifyableHandle>> {
        let inner = self.ops.notifyable_by_key(notifyable_key, access).await?;
        Ok(inner.map(|inner| {
            NotifyableHandle::wrap(Handle {
                ops: self.ops.clone(),
                inner,
            })
        }))
    }

    /// Creates an event-dispatch context with its own dispatcher task.
    pub fn create_client(&self) -> Client {
        let id = self.ops.next_client_id.fetch_add(1, Ordering::SeqCst) + 1;
        let core = Arc::new(ClientCore {
            id,
            queue: Arc::new(BlockingQueue::new()),
            handlers: DashMap::new(),
            next_handler_id: AtomicU64::new(0),
        });
        self.ops.clients.insert(id, core.clone());
        let task = tokio::spawn(run_dispatcher(core.clone()));
        self.ops.tasks.lock().push(task);
        debug!(client = id, "created client");
        Client {
            ops: self.ops.clone(),
            core,
        }
    }

    /// Installs a router on `resp_queue` that matches response envelopes
    /// to waiting senders by id; unroutable envelopes land in
    /// `completed_queue`.
    pub fn create_json_rpc_response_client(
        &self,
        resp_queue: Queue,
        completed_queue: Queue,
    ) -> RpcResponseClient {
        let waiters: Arc<DashMap<String, oneshot::Sender<RpcResponseEnvelope>>> =
            Arc::new(DashMap::new());
        let task = tokio::spawn(run_response_router(
            self.ops.clone(),
            resp_queue.clone(),
            completed_queue,
            waiters.clone(),
        ));
        self.ops.tasks.lock().push(task);
        RpcResponseClient {
            resp_queue,
            waiters,
        }
    }

    /// Installs a server loop on `recv_queue` dispatching requests through
    /// `methods`; results flow to each request's response queue or, when
    /// that is missing or unusable, to `completed_queue`.
    pub fn create_json_rpc_method_client(
        &self,
        recv_queue: Queue,
        completed_queue: Queue,
        methods: MethodRegistry,
    ) -> RpcMethodClient {
        let methods = Arc::new(methods);
        let task = tokio::spawn(run_method_server(
            self.ops.clone(),
            self.clone(),
            recv_queue,
            completed_queue,
            methods.clone(),
        ));
        self.ops.tasks.lock().push(task);
        RpcMethodClient { methods }
    }

    /// Issues a store-level sync, then drains the event pipeline so every
    /// previously observed write is reflected in the caches.
    pub async fn synchronize(&self) -> Result<()> {
        self.ops.ensure_connected()?;
        self.ops
            .store()
            .sync("/")
            .await
            .map_err(|e| ClusterlibError::from_store(e, "synchronize"))?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.ops
            .injector
            .send(InternalRequest::Sync(ack_tx))
            .map_err(|_| ClusterlibError::connection_failure("event loop has ended"))?;
        ack_rx
            .await
            .map_err(|_| ClusterlibError::connection_failure("event loop has ended"))
    }

    pub fn is_connected(&self) -> bool {
        self.ops.is_live() && self.ops.store.is_connected()
    }

    /// Signals end-of-service: releases every waiter, drains and joins the
    /// background tasks, and closes the store session.
    pub async fn shutdown(&self) -> Result<()> {
        info!("factory shutting down");
        let _ = self.ops.injector.send(InternalRequest::End);
        let _ = self.ops.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.ops.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.ops.store.close().await;
        Ok(())
    }
}

/// An event-dispatch context: handler registrations plus a dedicated
/// dispatcher task draining this client's queue.
#[derive(Clone)]
pub struct Client {
    ops: Arc<FactoryOps>,
    core: Arc<ClientCore>,
}

impl Client {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Registers a handler for events matching `(notifyable key, mask)`.
    pub fn register_handler(
        &self,
        notifyable_key: &str,
        mask: EventMask,
        handler: Arc<dyn UserEventHandler>,
    ) -> HandlerId {
        let id = self.core.next_handler_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.core.handlers.insert(
            id,
            RegisteredHandler {
                key: notifyable_key.to_string(),
                mask,
                handler,
            },
        );
        id
    }

    /// Unregisters a handler; pending deliveries complete, no new ones
    /// start.
    pub fn cancel_handler(&self, id: HandlerId) -> bool {
        self.core.handlers.remove(&id).is_some()
    }

    /// Schedules a timer whose expiration is delivered through this
    /// client's dispatcher.
    pub fn register_timer(
        &self,
        after_msecs: u64,
        data: Value,
        handler: Arc<dyn TimerEventHandler>,
    ) -> TimerId {
        self.ops
            .timer
            .schedule(after_msecs, data, handler, self.core.queue.clone())
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.ops.timer.cancel(id)
    }
}

async fn run_dispatcher(core: Arc<ClientCore>) {
    debug!(client = core.id, "client event dispatcher started");
    loop {
        match core.queue.take().await {
            ClientEvent::User(event) => {
                deliver(&core, &event).await;
            }
            ClientEvent::Timer { id, data, handler } => {
                if let Err(e) = handler.handle_timer_event(id, data).await {
                    warn!(client = core.id, error = %e, "timer handler failed");
                }
            }
            ClientEvent::End => {
                let end = UserEvent {
                    key: String::new(),
                    mask: EventMask::END_EVENT,
                };
                deliver(&core, &end).await;
                debug!(client = core.id, "client event dispatcher ended");
                return;
            }
        }
    }
}

/// Delivers one event to every matching handler, serially; handler errors
/// are logged and do not stop dispatch.
async fn deliver(core: &Arc<ClientCore>, event: &UserEvent) {
    let matching: Vec<Arc<dyn UserEventHandler>> = core
        .handlers
        .iter()
        .filter(|h| h.mask.intersects(event.mask))
        .filter(|h| event.mask.contains(EventMask::END_EVENT) || h.key == event.key)
        .map(|h| h.handler.clone())
        .collect();
    for handler in matching {
        if let Err(e) = handler.handle_user_event(event).await {
            warn!(client = core.id, error = %e, "user event handler failed");
        }
        if let Some(cond) = handler.condition() {
            cond.signal();
        }
    }
}

/// Routes response envelopes from `resp_queue` to waiting requests.
async fn run_response_router(
    ops: Arc<FactoryOps>,
    resp_queue: Queue,
    completed_queue: Queue,
    waiters: Arc<DashMap<String, oneshot::Sender<RpcResponseEnvelope>>>,
) {
    let poll = ops.config().rpc_poll_msecs as i64;
    let mut shutdown = ops.shutdown_tx.subscribe();
    info!(queue = %resp_queue.key(), "JSON-RPC response router started");
    while ops.is_live() && shutdown.try_recv().is_err() {
        let raw = match resp_queue.take_wait_msecs(poll).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "response router take failed; stopping");
                break;
            }
        };
        match serde_json::from_str::<RpcResponseEnvelope>(&raw) {
            Ok(envelope) => {
                let route = id_key(&envelope.id);
                match waiters.remove(&route) {
                    Some((_, tx)) => {
                        let _ = tx.send(envelope);
                    }
                    None => {
                        debug!(id = %route, "no waiter for response; forwarding to completed queue");
                        if let Err(e) = completed_queue.put(&raw).await {
                            warn!(error = %e, "failed to park unroutable response");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "unparseable response envelope; forwarding to completed queue");
                let _ = completed_queue.put(&raw).await;
            }
        }
    }
    info!("JSON-RPC response router ended");
}

/// Sends requests and routes their responses back by id.
pub struct RpcResponseClient {
    resp_queue: Queue,
    waiters: Arc<DashMap<String, oneshot::Sender<RpcResponseEnvelope>>>,
}

impl RpcResponseClient {
    /// Enqueues `{method, params: [obj], id}` at `recv_queue`, stamping the
    /// response-queue key into the parameter object, and returns the
    /// in-flight request.
    pub async fn send_request(
        &self,
        recv_queue: &Queue,
        method: &str,
        mut params: serde_json::Map<String, Value>,
    ) -> Result<PendingRpc> {
        let id_string = uuid::Uuid::new_v4().to_string();
        let id = Value::String(id_string);
        params.insert(
            crate::core::constants::JSON_KEY_RESP_QUEUE_KEY.to_string(),
            Value::String(self.resp_queue.key().to_string()),
        );
        let envelope = RpcRequestEnvelope {
            method: method.to_string(),
            params: vec![Value::Object(params)],
            id: id.clone(),
        };
        let encoded = serde_json::to_string(&envelope)?;
        let route = id_key(&id);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(route.clone(), tx);
        if let Err(e) = recv_queue.put(&encoded).await {
            self.waiters.remove(&route);
            return Err(e);
        }
        Ok(PendingRpc {
            id: route,
            rx,
            waiters: self.waiters.clone(),
        })
    }
}

/// Owns a method registry whose server loop drains a recv queue.
pub struct RpcMethodClient {
    methods: Arc<MethodRegistry>,
}

impl RpcMethodClient {
    pub fn method_names(&self) -> Vec<String> {
        self.methods.method_names()
    }
}

async fn run_method_server(
    ops: Arc<FactoryOps>,
    factory: Factory,
    recv_queue: Queue,
    completed_queue: Queue,
    methods: Arc<MethodRegistry>,
) {
    let poll = ops.config().rpc_poll_msecs as i64;
    let persistence = InMemoryStatePersistence::new();
    let mut shutdown = ops.shutdown_tx.subscribe();
    info!(queue = %recv_queue.key(), "JSON-RPC method server started");
    while ops.is_live() && shutdown.try_recv().is_err() {
        let raw = match recv_queue.take_wait_msecs(poll).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "method server take failed; stopping");
                break;
            }
        };
        process_request(&factory, &completed_queue, &methods, &persistence, &raw).await;
    }
    info!("JSON-RPC method server ended");
}

async fn process_request(
    factory: &Factory,
    completed_queue: &Queue,
    methods: &MethodRegistry,
    persistence: &dyn StatePersistence,
    raw: &str,
) {
    let request = match serde_json::from_str::<RpcRequestEnvelope>(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "unparseable request envelope");
            let envelope =
                RpcResponseEnvelope::failure(format!("unparseable request: {e}"), Value::Null);
            park_response(completed_queue, &envelope).await;
            return;
        }
    };
    let resp_queue_key = request
        .param_object()
        .ok()
        .and_then(|o| o.get(crate::core::constants::JSON_KEY_RESP_QUEUE_KEY))
        .and_then(Value::as_str)
        .map(str::to_string);
    let envelope = dispatch(methods, persistence, &request).await;

    if let Some(resp_key) = resp_queue_key {
        match factory
            .notifyable_from_key(&resp_key, AccessType::LoadFromRepository)
            .await
        {
            Ok(Some(handle)) => {
                if let Some(queue) = handle.as_queue() {
                    match serde_json::to_string(&envelope) {
                        Ok(encoded) => {
                            if queue.put(&encoded).await.is_ok() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode response envelope"),
                    }
                }
            }
            Ok(None) => debug!(key = %resp_key, "response queue not found"),
            Err(e) => debug!(key = %resp_key, error = %e, "response queue unresolvable"),
        }
    }
    park_response(completed_queue, &envelope).await;
}

async fn dispatch(
    methods: &MethodRegistry,
    persistence: &dyn StatePersistence,
    request: &RpcRequestEnvelope,
) -> RpcResponseEnvelope {
    let Some(method) = methods.get(&request.method) else {
        return RpcResponseEnvelope::failure(
            format!("unknown method '{}'", request.method),
            request.id.clone(),
        );
    };
    let params = match request.param_object() {
        Ok(params) => params,
        Err(e) => return RpcResponseEnvelope::failure(e.to_string(), request.id.clone()),
    };
    if let Err(e) = method.check_params(params) {
        return RpcResponseEnvelope::failure(e.to_string(), request.id.clone());
    }
    match method
        .invoke(&request.method, &request.params, persistence)
        .await
    {
        Ok(result) => RpcResponseEnvelope::success(result, request.id.clone()),
        Err(e) => RpcResponseEnvelope::failure(e.to_string(), request.id.clone()),
    }
}

async fn park_response(completed_queue: &Queue, envelope: &RpcResponseEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(encoded) => {
            if let Err(e) = completed_queue.put(&encoded).await {
                warn!(error = %e, "failed to park response in completed queue");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode parked response"),
    }
}
