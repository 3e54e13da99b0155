// src/core/store/mod.rs

//! The coordination-store contract consumed by the core.
//!
//! The concrete production client (a ZooKeeper-class ensemble) lives outside
//! this crate; the core is written against [`DataStore`].  The contract is:
//! path-addressed CRUD with stat metadata, versioned writes, persistent /
//! ephemeral / sequenced creates, one-shot watches, and a session event
//! stream.  [`memory`] provides an in-process implementation for tests.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures surfaced by a store adapter.  The core maps these into its own
/// error taxonomy at call sites.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("no node: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("bad version for {0}")]
    BadVersion(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("no children allowed under ephemeral node: {0}")]
    NoChildrenForEphemerals(String),

    #[error("invalid path: {0}")]
    BadPath(String),

    #[error("connection loss")]
    ConnectionLoss,

    #[error("session expired")]
    SessionExpired,

    #[error("store internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Node metadata returned alongside reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: u64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

/// Creation flags.  Sequence variants append a monotonically increasing
/// ten-digit decimal suffix to the supplied name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Session lifecycle states reported through the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Connected,
    Disconnected,
    Expired,
    Closed,
}

/// A single watch fire or session transition.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    Session(SessionState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Empty for session events.
    pub path: String,
    pub kind: StoreEventKind,
}

/// The store adapter consumed by the core.
///
/// Watches are one-shot: every load path that registers one must be prepared
/// to re-arm it after it fires.  Events for one path arrive in the order the
/// store emitted them.
#[async_trait]
pub trait DataStore: Send + Sync + fmt::Debug {
    /// Creates a node, returning the actual path (sequence suffix included).
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> StoreResult<String>;

    /// Deletes a node.  `version` of -1 matches any.
    async fn delete(&self, path: &str, version: i32) -> StoreResult<()>;

    /// Checks existence, optionally leaving a watch for creation, deletion,
    /// or data change.
    async fn exists(&self, path: &str, watch: bool) -> StoreResult<Option<Stat>>;

    /// Reads data and stat, optionally leaving a data watch.
    async fn get(&self, path: &str, watch: bool) -> StoreResult<(Bytes, Stat)>;

    /// Writes data.  Fails with [`StoreError::BadVersion`] if `version`
    /// is neither -1 nor the node's current version.
    async fn set(&self, path: &str, data: Bytes, version: i32) -> StoreResult<Stat>;

    /// Lists child names (terminal components), optionally leaving a
    /// children watch.
    async fn get_children(&self, path: &str, watch: bool) -> StoreResult<Vec<String>>;

    /// Flushes the leader channel so prior writes are visible to reads.
    async fn sync(&self, path: &str) -> StoreResult<()>;

    /// Takes the session's event stream.  Yields `Some` exactly once.
    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<StoreEvent>>;

    fn session_id(&self) -> u64;

    fn is_connected(&self) -> bool;

    /// Ends the session; ephemerals are discarded by the store.
    async fn close(&self);
}
