// src/core/notifyable/mod.rs

//! The typed notifyable hierarchy.
//!
//! Every addressable entity (Root, Application, Group, Node, ProcessSlot,
//! PropertyList, DataDistribution, Queue) is materialised lazily from its
//! repository key, interned in a per-type map, and kept live via watches.
//! Handles are cheap clones carrying the intern entry and the factory
//! context; parent/child navigation is key lookup, never pointer chasing.
//!
//! Deep inheritance is replaced by capability traits: a concrete entity
//! composes `HasGroups`, `HasNodes`, `HasPropertyLists`, ... according to
//! the child directories its registered type declares.

pub mod application;
pub mod base;
pub mod data_distribution;
pub mod group;
pub mod node;
pub mod process_slot;
pub mod property_list;
pub mod queue;
pub mod root;

pub use application::Application;
pub use data_distribution::DataDistribution;
pub use group::Group;
pub use node::Node;
pub use process_slot::ProcessSlot;
pub use property_list::PropertyList;
pub use queue::Queue;
pub use root::Root;

use std::sync::Arc;

use crate::core::cached::key_values::CachedKeyValuesData;
use crate::core::cached::process_info::CachedProcessInfoData;
use crate::core::cached::process_slot_info::CachedProcessSlotInfoData;
use crate::core::cached::shards::CachedShardsData;
use crate::core::cached::state::CachedStateData;
use crate::core::cached::{CachedAttr, CachedState};
use crate::core::constants::{
    APPLICATION_DIR, CURRENT_STATE_DIR, DATADISTRIBUTION_DIR, DESIRED_STATE_DIR, GROUP_DIR,
    KEYVAL_NODE, NODE_DIR, PROCESSINFO_NODE, PROCESSSLOT_DIR, PROCESSSLOTINFO_NODE,
    PROPERTYLIST_DIR, QUEUE_DIR, SHARDS_NODE,
};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::FactoryOps;
use crate::core::locks::{DistributedLockMode, LockBid, LockName};

/// Desired access to a notifyable.
///
/// This determines what type of distributed lock is taken on the parent:
/// `CachedOnly` takes none, `LoadFromRepository` a shared child lock, and
/// `CreateIfNotFound` an exclusive child lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
pub enum AccessType {
    /// Only consult the in-memory cache.
    #[strum(serialize = "CACHED_ONLY")]
    CachedOnly,
    /// Consult the cache, then the repository.
    #[strum(serialize = "LOAD_FROM_REPOSITORY")]
    LoadFromRepository,
    /// Create the entity if neither the cache nor the repository has it.
    #[strum(serialize = "CREATE_IF_NOT_FOUND")]
    CreateIfNotFound,
}

/// Every notifyable kind in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum NotifyableKind {
    #[strum(serialize = "root")]
    Root,
    #[strum(serialize = "application")]
    Application,
    #[strum(serialize = "group")]
    Group,
    #[strum(serialize = "node")]
    Node,
    #[strum(serialize = "processSlot")]
    ProcessSlot,
    #[strum(serialize = "propertyList")]
    PropertyList,
    #[strum(serialize = "dataDistribution")]
    DataDistribution,
    #[strum(serialize = "queue")]
    Queue,
}

/// Lifecycle state of a handle.  `getState` is always safe; a `Removed`
/// entity rejects mutating calls but keeps its last cached snapshot
/// readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyableState {
    Ready,
    Removed,
}

/// The interned representation of one notifyable.
pub(crate) struct NotifyableInner {
    pub(crate) kind: NotifyableKind,
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) state: parking_lot::RwLock<NotifyableState>,
    pub(crate) current_state: Arc<CachedStateData>,
    pub(crate) desired_state: Arc<CachedStateData>,
    pub(crate) key_values: Option<Arc<CachedKeyValuesData>>,
    pub(crate) shards: Option<Arc<CachedShardsData>>,
    pub(crate) process_info: Option<Arc<CachedProcessInfoData>>,
    pub(crate) process_slot_info: Option<Arc<CachedProcessSlotInfoData>>,
}

impl NotifyableInner {
    pub(crate) fn new(kind: NotifyableKind, key: &str, name: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
            name: name.to_string(),
            state: parking_lot::RwLock::new(NotifyableState::Ready),
            current_state: CachedStateData::new(format!("{key}/{CURRENT_STATE_DIR}")),
            desired_state: CachedStateData::new(format!("{key}/{DESIRED_STATE_DIR}")),
            key_values: (kind == NotifyableKind::PropertyList)
                .then(|| CachedKeyValuesData::new(format!("{key}/{KEYVAL_NODE}"))),
            shards: (kind == NotifyableKind::DataDistribution)
                .then(|| CachedShardsData::new(format!("{key}/{SHARDS_NODE}"))),
            process_info: (kind == NotifyableKind::ProcessSlot)
                .then(|| CachedProcessInfoData::new(format!("{key}/{PROCESSINFO_NODE}"))),
            process_slot_info: (kind == NotifyableKind::Node)
                .then(|| CachedProcessSlotInfoData::new(format!("{key}/{PROCESSSLOTINFO_NODE}"))),
        }
    }

    pub(crate) fn get_state(&self) -> NotifyableState {
        *self.state.read()
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.get_state() {
            NotifyableState::Ready => Ok(()),
            NotifyableState::Removed => Err(ClusterlibError::object_removed(&self.key)),
        }
    }

    pub(crate) fn mark_removed(&self) {
        *self.state.write() = NotifyableState::Removed;
    }

    /// Backing paths of this notifyable's cached attributes, for the
    /// event-routing index.
    pub(crate) fn attr_paths(&self) -> Vec<(String, CachedAttr)> {
        let mut paths = vec![
            (
                self.current_state.path().to_string(),
                CachedAttr::CurrentState,
            ),
            (
                self.desired_state.path().to_string(),
                CachedAttr::DesiredState,
            ),
        ];
        if let Some(kv) = &self.key_values {
            paths.push((kv.path().to_string(), CachedAttr::KeyValues));
        }
        if let Some(shards) = &self.shards {
            paths.push((shards.path().to_string(), CachedAttr::Shards));
        }
        if let Some(pi) = &self.process_info {
            paths.push((pi.path().to_string(), CachedAttr::ProcessInfo));
        }
        if let Some(psi) = &self.process_slot_info {
            paths.push((psi.path().to_string(), CachedAttr::ProcessSlotInfo));
        }
        paths
    }

    /// Reloads one cached attribute from the repository (invalidate +
    /// re-watch); used by the event loop when the backing path fires.
    pub(crate) async fn reload_attr(&self, ops: &FactoryOps, attr: CachedAttr) -> Result<()> {
        match attr {
            CachedAttr::CurrentState => self.current_state.reload(ops).await,
            CachedAttr::DesiredState => self.desired_state.reload(ops).await,
            CachedAttr::KeyValues => match &self.key_values {
                Some(kv) => kv.reload(ops).await,
                None => Ok(()),
            },
            CachedAttr::Shards => match &self.shards {
                Some(shards) => shards.reload(ops).await,
                None => Ok(()),
            },
            CachedAttr::ProcessInfo => match &self.process_info {
                Some(pi) => pi.reload(ops).await,
                None => Ok(()),
            },
            CachedAttr::ProcessSlotInfo => match &self.process_slot_info {
                Some(psi) => psi.reload(ops).await,
                None => Ok(()),
            },
        }
    }
}

/// Child directories each kind may carry, and the kind found under each.
pub(crate) fn allowed_child_dirs(
    kind: NotifyableKind,
) -> &'static [(&'static str, NotifyableKind)] {
    use NotifyableKind::*;
    match kind {
        Root => &[(APPLICATION_DIR, Application)],
        Application => &[
            (GROUP_DIR, Group),
            (DATADISTRIBUTION_DIR, DataDistribution),
            (PROPERTYLIST_DIR, PropertyList),
            (QUEUE_DIR, Queue),
        ],
        Group => &[
            (GROUP_DIR, Group),
            (NODE_DIR, Node),
            (DATADISTRIBUTION_DIR, DataDistribution),
            (PROPERTYLIST_DIR, PropertyList),
            (QUEUE_DIR, Queue),
        ],
        Node => &[
            (PROCESSSLOT_DIR, ProcessSlot),
            (PROPERTYLIST_DIR, PropertyList),
            (QUEUE_DIR, Queue),
        ],
        ProcessSlot => &[(PROPERTYLIST_DIR, PropertyList), (QUEUE_DIR, Queue)],
        DataDistribution => &[(PROPERTYLIST_DIR, PropertyList)],
        PropertyList | Queue => &[],
    }
}

/// The shared content of every typed handle.
#[derive(Clone)]
pub struct Handle {
    pub(crate) ops: Arc<FactoryOps>,
    pub(crate) inner: Arc<NotifyableInner>,
}

/// A dynamically typed handle, returned where the concrete kind is not
/// statically known (parent navigation, key resolution).
#[derive(Clone)]
pub enum NotifyableHandle {
    Root(Root),
    Application(Application),
    Group(Group),
    Node(Node),
    ProcessSlot(ProcessSlot),
    PropertyList(PropertyList),
    DataDistribution(DataDistribution),
    Queue(Queue),
}

impl NotifyableHandle {
    pub(crate) fn wrap(h: Handle) -> Self {
        match h.inner.kind {
            NotifyableKind::Root => NotifyableHandle::Root(Root { h }),
            NotifyableKind::Application => NotifyableHandle::Application(Application { h }),
            NotifyableKind::Group => NotifyableHandle::Group(Group { h }),
            NotifyableKind::Node => NotifyableHandle::Node(Node { h }),
            NotifyableKind::ProcessSlot => NotifyableHandle::ProcessSlot(ProcessSlot { h }),
            NotifyableKind::PropertyList => NotifyableHandle::PropertyList(PropertyList { h }),
            NotifyableKind::DataDistribution => {
                NotifyableHandle::DataDistribution(DataDistribution { h })
            }
            NotifyableKind::Queue => NotifyableHandle::Queue(Queue { h }),
        }
    }

    pub fn as_application(&self) -> Option<&Application> {
        match self {
            NotifyableHandle::Application(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            NotifyableHandle::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            NotifyableHandle::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_process_slot(&self) -> Option<&ProcessSlot> {
        match self {
            NotifyableHandle::ProcessSlot(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_property_list(&self) -> Option<&PropertyList> {
        match self {
            NotifyableHandle::PropertyList(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_data_distribution(&self) -> Option<&DataDistribution> {
        match self {
            NotifyableHandle::DataDistribution(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_queue(&self) -> Option<&Queue> {
        match self {
            NotifyableHandle::Queue(q) => Some(q),
            _ => None,
        }
    }
}

impl Notifyable for NotifyableHandle {
    fn handle(&self) -> &Handle {
        match self {
            NotifyableHandle::Root(x) => &x.h,
            NotifyableHandle::Application(x) => &x.h,
            NotifyableHandle::Group(x) => &x.h,
            NotifyableHandle::Node(x) => &x.h,
            NotifyableHandle::ProcessSlot(x) => &x.h,
            NotifyableHandle::PropertyList(x) => &x.h,
            NotifyableHandle::DataDistribution(x) => &x.h,
            NotifyableHandle::Queue(x) => &x.h,
        }
    }
}

/// Identity, state, locks, cached state, and removal: the contract shared
/// by every entity in the hierarchy.
#[allow(async_fn_in_trait)]
pub trait Notifyable: Clone + Send + Sync + Sized {
    #[doc(hidden)]
    fn handle(&self) -> &Handle;

    fn name(&self) -> &str {
        &self.handle().inner.name
    }

    fn key(&self) -> &str {
        &self.handle().inner.key
    }

    fn kind(&self) -> NotifyableKind {
        self.handle().inner.kind
    }

    fn get_state(&self) -> NotifyableState {
        self.handle().inner.get_state()
    }

    /// True iff both handles refer to the same interned entity.
    fn is_same(&self, other: &impl Notifyable) -> bool {
        Arc::ptr_eq(&self.handle().inner, &other.handle().inner)
    }

    fn cached_current_state(&self) -> CachedState {
        let h = self.handle();
        CachedState {
            ops: h.ops.clone(),
            ntf: h.inner.clone(),
            data: h.inner.current_state.clone(),
        }
    }

    fn cached_desired_state(&self) -> CachedState {
        let h = self.handle();
        CachedState {
            ops: h.ops.clone(),
            ntf: h.inner.clone(),
            data: h.inner.desired_state.clone(),
        }
    }

    /// The parent notifyable; `None` for the Root.
    async fn parent(&self) -> Result<Option<NotifyableHandle>> {
        base::parent(self.handle()).await
    }

    /// The enclosing Application, if this entity lives under one.
    async fn my_application(&self) -> Result<Option<Application>> {
        base::my_application(self.handle()).await
    }

    /// The nearest enclosing Group, if any.
    async fn my_group(&self) -> Result<Option<Group>> {
        base::my_group(self.handle()).await
    }

    async fn acquire_lock(
        &self,
        lock_name: LockName,
        mode: DistributedLockMode,
        msec_timeout: i64,
    ) -> Result<()> {
        base::acquire_lock(self.handle(), lock_name, mode, msec_timeout).await
    }

    async fn release_lock(&self, lock_name: LockName) -> Result<()> {
        let h = self.handle();
        h.ops.locks().release(&h.ops, &h.inner.key, lock_name).await
    }

    /// Acquires the lock on this notifyable and, pre-order, on every
    /// descendant; unwinds on failure.
    async fn acquire_lock_recursive(
        &self,
        lock_name: LockName,
        mode: DistributedLockMode,
        msec_timeout: i64,
    ) -> Result<()> {
        base::acquire_lock_recursive(self.handle(), lock_name, mode, msec_timeout).await
    }

    /// Releases the lock on this notifyable and on every descendant still
    /// held by this client.
    async fn release_lock_recursive(&self, lock_name: LockName) -> Result<()> {
        base::release_lock_recursive(self.handle(), lock_name).await
    }

    fn has_lock(&self, lock_name: LockName) -> Option<DistributedLockMode> {
        let h = self.handle();
        h.ops.locks().has_lock(&h.inner.key, lock_name)
    }

    /// The front of the bid queue for a lock namespace, if any.
    async fn get_lock_owner(&self, lock_name: LockName) -> Result<Option<LockBid>> {
        let h = self.handle();
        h.ops
            .locks()
            .get_owner(&h.ops, &h.inner.key, lock_name)
            .await
    }

    /// Advisory ownership: identical protocol to [`LockName::Notifyable`],
    /// separate namespace.
    async fn acquire_ownership(&self, msec_timeout: i64) -> Result<()> {
        self.acquire_lock(LockName::Ownership, DistributedLockMode::Excl, msec_timeout)
            .await
    }

    async fn release_ownership(&self) -> Result<()> {
        self.release_lock(LockName::Ownership).await
    }

    fn has_ownership(&self) -> bool {
        self.has_lock(LockName::Ownership) == Some(DistributedLockMode::Excl)
    }

    /// Client id of the current owner, if anyone holds ownership.
    async fn get_owner(&self) -> Result<Option<String>> {
        Ok(self
            .get_lock_owner(LockName::Ownership)
            .await?
            .map(|bid| bid.client_id))
    }

    /// Removes this notifyable from the repository.  With `recursive`
    /// false, fails without mutation if any child exists.
    async fn remove(&self, recursive: bool) -> Result<()> {
        base::remove(self.handle(), recursive).await
    }
}

/// Child enumeration and typed access, one capability per child kind.
#[allow(async_fn_in_trait)]
pub trait HasApplications: Notifyable {
    async fn application_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), APPLICATION_DIR).await
    }

    async fn get_application(&self, name: &str, access: AccessType) -> Result<Option<Application>> {
        Ok(
            base::get_child(self.handle(), NotifyableKind::Application, name, access)
                .await?
                .map(|h| Application { h }),
        )
    }
}

#[allow(async_fn_in_trait)]
pub trait HasGroups: Notifyable {
    async fn group_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), GROUP_DIR).await
    }

    async fn get_group(&self, name: &str, access: AccessType) -> Result<Option<Group>> {
        Ok(base::get_child(self.handle(), NotifyableKind::Group, name, access)
            .await?
            .map(|h| Group { h }))
    }
}

#[allow(async_fn_in_trait)]
pub trait HasNodes: Notifyable {
    async fn node_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), NODE_DIR).await
    }

    async fn get_node(&self, name: &str, access: AccessType) -> Result<Option<Node>> {
        Ok(base::get_child(self.handle(), NotifyableKind::Node, name, access)
            .await?
            .map(|h| Node { h }))
    }
}

#[allow(async_fn_in_trait)]
pub trait HasProcessSlots: Notifyable {
    async fn process_slot_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), PROCESSSLOT_DIR).await
    }

    async fn get_process_slot(&self, name: &str, access: AccessType) -> Result<Option<ProcessSlot>> {
        Ok(
            base::get_child(self.handle(), NotifyableKind::ProcessSlot, name, access)
                .await?
                .map(|h| ProcessSlot { h }),
        )
    }
}

#[allow(async_fn_in_trait)]
pub trait HasPropertyLists: Notifyable {
    async fn property_list_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), PROPERTYLIST_DIR).await
    }

    async fn get_property_list(&self, name: &str, access: AccessType) -> Result<Option<PropertyList>> {
        Ok(
            base::get_child(self.handle(), NotifyableKind::PropertyList, name, access)
                .await?
                .map(|h| PropertyList { h }),
        )
    }
}

#[allow(async_fn_in_trait)]
pub trait HasDataDistributions: Notifyable {
    async fn data_distribution_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), DATADISTRIBUTION_DIR).await
    }

    async fn get_data_distribution(
        &self,
        name: &str,
        access: AccessType,
    ) -> Result<Option<DataDistribution>> {
        Ok(
            base::get_child(self.handle(), NotifyableKind::DataDistribution, name, access)
                .await?
                .map(|h| DataDistribution { h }),
        )
    }
}

#[allow(async_fn_in_trait)]
pub trait HasQueues: Notifyable {
    async fn queue_names(&self) -> Result<Vec<String>> {
        base::child_names(self.handle(), QUEUE_DIR).await
    }

    async fn get_queue(&self, name: &str, access: AccessType) -> Result<Option<Queue>> {
        Ok(base::get_child(self.handle(), NotifyableKind::Queue, name, access)
            .await?
            .map(|h| Queue { h }))
    }
}
