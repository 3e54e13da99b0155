// src/core/rpc/mod.rs

//! JSON-RPC 1.0 request/response carried by durable queues.
//!
//! A request `{method, params: [{...}], id}` is enqueued at the target's
//! recv queue.  The reserved param key `respQueueKey` names the sender's
//! response queue; the server enqueues a success or error envelope there,
//! falling back to its completed queue when the response queue is missing
//! or unusable.  A response client drains its response queue and routes
//! envelopes to waiting senders by id.

pub mod methods;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::core::errors::{ClusterlibError, Result};

/// JSON-RPC 1.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequestEnvelope {
    pub method: String,
    pub params: Vec<Value>,
    pub id: Value,
}

impl RpcRequestEnvelope {
    /// The required leading parameter object.
    pub fn param_object(&self) -> Result<&Map<String, Value>> {
        self.params
            .first()
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ClusterlibError::rpc_invocation(
                    "request params must carry an object as their first element",
                )
            })
    }
}

/// JSON-RPC 1.0 response envelope: exactly one of `result`/`error` is
/// non-null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponseEnvelope {
    pub result: Value,
    pub error: Value,
    pub id: Value,
}

impl RpcResponseEnvelope {
    pub fn success(result: Value, id: Value) -> Self {
        Self {
            result,
            error: Value::Null,
            id,
        }
    }

    pub fn failure(error: impl Into<String>, id: Value) -> Self {
        Self {
            result: Value::Null,
            error: Value::String(error.into()),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_null()
    }
}

/// State that survives across method invocations, keyed by method-local
/// names.
pub trait StatePersistence: Send + Sync {
    fn get(&self, name: &str) -> Option<Value>;
    fn set(&self, name: &str, state: Value);
    fn erase(&self, name: &str);
}

/// The default in-process persistence.
#[derive(Debug, Default)]
pub struct InMemoryStatePersistence {
    states: DashMap<String, Value>,
}

impl InMemoryStatePersistence {
    pub fn new() -> Self {
        Default::default()
    }
}

impl StatePersistence for InMemoryStatePersistence {
    fn get(&self, name: &str) -> Option<Value> {
        self.states.get(name).map(|v| v.value().clone())
    }

    fn set(&self, name: &str, state: Value) {
        self.states.insert(name.to_string(), state);
    }

    fn erase(&self, name: &str) {
        self.states.remove(name);
    }
}

/// One callable JSON-RPC method.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    fn name(&self) -> &str;

    /// Validates the leading parameter object before invocation.
    fn check_params(&self, params: &Map<String, Value>) -> Result<()>;

    async fn invoke(
        &self,
        name: &str,
        params: &[Value],
        persistence: &dyn StatePersistence,
    ) -> Result<Value>;
}

/// An immutable set of methods a server loop dispatches by name.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn RpcMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a method; each method must have a unique name.
    pub fn register(&mut self, method: Arc<dyn RpcMethod>) -> Result<()> {
        let name = method.name().to_string();
        if self.methods.contains_key(&name) {
            return Err(ClusterlibError::invalid_arguments(format!(
                "method '{name}' is already registered"
            )));
        }
        self.methods.insert(name, method);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn RpcMethod>> {
        self.methods.get(name)
    }
}

/// A request in flight, waiting for its response envelope.
pub struct PendingRpc {
    pub(crate) id: String,
    pub(crate) rx: oneshot::Receiver<RpcResponseEnvelope>,
    pub(crate) waiters: Arc<DashMap<String, oneshot::Sender<RpcResponseEnvelope>>>,
}

impl PendingRpc {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the response.  `-1` waits forever, `0` checks without
    /// blocking, `> 0` bounds the wait; `None` means no response arrived
    /// in time.
    pub async fn wait_response_msecs(
        &mut self,
        msec_timeout: i64,
    ) -> Result<Option<RpcResponseEnvelope>> {
        match msec_timeout {
            t if t < -1 => Err(ClusterlibError::invalid_arguments(format!(
                "wait_response_msecs: cannot have msec_timeout < -1 ({t})"
            ))),
            -1 => match (&mut self.rx).await {
                Ok(envelope) => Ok(Some(envelope)),
                Err(_) => Err(ClusterlibError::connection_failure(
                    "response routing ended before a response arrived",
                )),
            },
            0 => match self.rx.try_recv() {
                Ok(envelope) => Ok(Some(envelope)),
                Err(oneshot::error::TryRecvError::Empty) => Ok(None),
                Err(oneshot::error::TryRecvError::Closed) => Err(
                    ClusterlibError::connection_failure(
                        "response routing ended before a response arrived",
                    ),
                ),
            },
            t => match tokio::time::timeout(Duration::from_millis(t as u64), &mut self.rx).await {
                Ok(Ok(envelope)) => Ok(Some(envelope)),
                Ok(Err(_)) => Err(ClusterlibError::connection_failure(
                    "response routing ended before a response arrived",
                )),
                Err(_) => Ok(None),
            },
        }
    }
}

impl Drop for PendingRpc {
    fn drop(&mut self) {
        self.waiters.remove(&self.id);
    }
}

/// Canonical routing key for a JSON-RPC id value.
pub(crate) fn id_key(id: &Value) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_round_trip() {
        let request = RpcRequestEnvelope {
            method: "startProcess".into(),
            params: vec![json!({"notifyableKey": "/clusterlib/1.0/root"})],
            id: json!(42),
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: RpcRequestEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.param_object().is_ok());
    }

    #[test]
    fn response_envelope_shapes() {
        let ok = RpcResponseEnvelope::success(json!({"pid": 7}), json!("a"));
        assert!(!ok.is_error());
        assert_eq!(ok.error, Value::Null);

        let err = RpcResponseEnvelope::failure("no such method", json!("a"));
        assert!(err.is_error());
        assert_eq!(err.result, Value::Null);
    }

    #[test]
    fn param_object_is_required() {
        let bad = RpcRequestEnvelope {
            method: "m".into(),
            params: vec![json!(3)],
            id: Value::Null,
        };
        assert!(bad.param_object().is_err());
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        struct M;
        #[async_trait]
        impl RpcMethod for M {
            fn name(&self) -> &str {
                "m"
            }
            fn check_params(&self, _params: &Map<String, Value>) -> Result<()> {
                Ok(())
            }
            async fn invoke(
                &self,
                _name: &str,
                _params: &[Value],
                _persistence: &dyn StatePersistence,
            ) -> Result<Value> {
                Ok(Value::Null)
            }
        }
        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(M)).unwrap();
        assert!(registry.register(Arc::new(M)).is_err());
        assert_eq!(registry.method_names(), vec!["m".to_string()]);
        assert!(registry.unregister("m"));
        assert!(!registry.unregister("m"));
    }
}
