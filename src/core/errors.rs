// src/core/errors.rs

//! Defines the primary error type for the entire library.

use std::backtrace::Backtrace;
use std::sync::Arc;
use thiserror::Error;

use crate::core::store::StoreError;

/// The error taxonomy surfaced by every public operation.
/// Using `thiserror` allows for clean error definitions and automatic `Display` output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Object removed: {0}")]
    ObjectRemoved(String),

    #[error("Repository connection failure: {0}")]
    RepositoryConnectionFailure(String),

    #[error("Repository internals failure: {0}")]
    RepositoryInternalsFailure(String),

    #[error("Publish conflict on '{path}': cached version {cached_version} is stale")]
    PublishConflict { path: String, cached_version: i32 },

    #[error("Lock timeout after {0} msecs")]
    LockTimeout(i64),

    #[error("Inconsistent internal state: {0}")]
    InconsistentInternalState(String),

    #[error("System failure: {0}")]
    SystemFailure(String),

    #[error("RPC invocation failure: {0}")]
    RpcInvocation(String),
}

/// An error kind paired with a backtrace captured at construction time.
///
/// The backtrace obeys `RUST_BACKTRACE`; when disabled, capture is cheap.
#[derive(Debug, Clone)]
pub struct ClusterlibError {
    kind: ErrorKind,
    backtrace: Arc<Backtrace>,
}

pub type Result<T> = std::result::Result<T, ClusterlibError>;

impl ClusterlibError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments(msg.into()))
    }

    pub fn invalid_method(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMethod(msg.into()))
    }

    pub fn object_removed(key: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjectRemoved(key.into()))
    }

    pub fn connection_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepositoryConnectionFailure(msg.into()))
    }

    pub fn repository_internals(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepositoryInternalsFailure(msg.into()))
    }

    pub fn publish_conflict(path: impl Into<String>, cached_version: i32) -> Self {
        Self::new(ErrorKind::PublishConflict {
            path: path.into(),
            cached_version,
        })
    }

    pub fn lock_timeout(msecs: i64) -> Self {
        Self::new(ErrorKind::LockTimeout(msecs))
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InconsistentInternalState(msg.into()))
    }

    pub fn system_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SystemFailure(msg.into()))
    }

    pub fn rpc_invocation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RpcInvocation(msg.into()))
    }

    /// Maps a store-adapter failure observed outside of a publish into the
    /// library taxonomy.  `BadVersion` is mapped by publish call sites, which
    /// know the backing path and cached version; seeing it here means a
    /// non-versioned operation hit it.
    pub fn from_store(err: StoreError, context: &str) -> Self {
        match err {
            StoreError::ConnectionLoss | StoreError::SessionExpired => {
                Self::connection_failure(format!("{context}: {err}"))
            }
            other => Self::repository_internals(format!("{context}: {other}")),
        }
    }
}

impl std::fmt::Display for ClusterlibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for ClusterlibError {}

impl PartialEq for ClusterlibError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl From<ErrorKind> for ClusterlibError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<serde_json::Error> for ClusterlibError {
    fn from(e: serde_json::Error) -> Self {
        Self::repository_internals(format!("JSON serialization/deserialization error: {e}"))
    }
}
