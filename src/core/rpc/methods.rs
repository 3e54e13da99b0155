// src/core/rpc/methods.rs

//! The predefined process-management methods.
//!
//! Both methods act by editing the target process slot's desired state;
//! the per-process checker that observes desired state and actually forks
//! or signals the managed process lives outside this crate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::constants::{
    JSON_KEY_ADD_ENV, JSON_KEY_COMMAND, JSON_KEY_NOTIFYABLE_KEY, JSON_KEY_PATH, JSON_KEY_SIGNAL,
    PLK_STATE, PLV_STATE_RUNNING, PLV_STATE_STOPPED, RPC_START_PROCESS, RPC_STOP_PROCESS,
};
use crate::core::errors::{ClusterlibError, Result};
use crate::core::factory::Factory;
use crate::core::notifyable::{AccessType, Notifyable, ProcessSlot};
use crate::core::rpc::{RpcMethod, StatePersistence};

async fn resolve_process_slot(factory: &Factory, params: &Map<String, Value>) -> Result<ProcessSlot> {
    let slot_key = params
        .get(JSON_KEY_NOTIFYABLE_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ClusterlibError::rpc_invocation(format!("missing '{JSON_KEY_NOTIFYABLE_KEY}' param"))
        })?;
    match factory
        .notifyable_from_key(slot_key, AccessType::LoadFromRepository)
        .await?
    {
        Some(handle) => handle.as_process_slot().cloned().ok_or_else(|| {
            ClusterlibError::rpc_invocation(format!("'{slot_key}' is not a process slot"))
        }),
        None => Err(ClusterlibError::rpc_invocation(format!(
            "no process slot at '{slot_key}'"
        ))),
    }
}

fn require_key(params: &Map<String, Value>) -> Result<()> {
    match params.get(JSON_KEY_NOTIFYABLE_KEY) {
        Some(Value::String(_)) => Ok(()),
        _ => Err(ClusterlibError::invalid_arguments(format!(
            "'{JSON_KEY_NOTIFYABLE_KEY}' must be a string"
        ))),
    }
}

/// Requests that a process be started in a slot: records the launch
/// parameters (`addEnv`, `path`, `command`) and the running target state
/// in the slot's desired state.
pub struct StartProcessMethod {
    factory: Factory,
}

impl StartProcessMethod {
    pub fn new(factory: Factory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl RpcMethod for StartProcessMethod {
    fn name(&self) -> &str {
        RPC_START_PROCESS
    }

    fn check_params(&self, params: &Map<String, Value>) -> Result<()> {
        require_key(params)?;
        if let Some(add_env) = params.get(JSON_KEY_ADD_ENV)
            && !add_env.is_array()
        {
            return Err(ClusterlibError::invalid_arguments(format!(
                "'{JSON_KEY_ADD_ENV}' must be an array"
            )));
        }
        for string_key in [JSON_KEY_PATH, JSON_KEY_COMMAND] {
            if let Some(v) = params.get(string_key)
                && !v.is_string()
            {
                return Err(ClusterlibError::invalid_arguments(format!(
                    "'{string_key}' must be a string"
                )));
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        _name: &str,
        params: &[Value],
        _persistence: &dyn StatePersistence,
    ) -> Result<Value> {
        let param_obj = params.first().and_then(Value::as_object).ok_or_else(|| {
            ClusterlibError::rpc_invocation("startProcess requires a parameter object")
        })?;
        let slot = resolve_process_slot(&self.factory, param_obj).await?;
        let desired = slot.cached_desired_state();
        for forwarded in [JSON_KEY_ADD_ENV, JSON_KEY_PATH, JSON_KEY_COMMAND] {
            if let Some(value) = param_obj.get(forwarded) {
                desired.set(forwarded, value.clone())?;
            }
        }
        desired.set(PLK_STATE, Value::from(PLV_STATE_RUNNING))?;
        desired.publish(true).await?;
        Ok(serde_json::json!({
            JSON_KEY_NOTIFYABLE_KEY: slot.key(),
            PLK_STATE: PLV_STATE_RUNNING,
        }))
    }
}

/// Requests that a slot's process be stopped, optionally with a specific
/// signal number.
pub struct StopProcessMethod {
    factory: Factory,
}

impl StopProcessMethod {
    pub fn new(factory: Factory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl RpcMethod for StopProcessMethod {
    fn name(&self) -> &str {
        RPC_STOP_PROCESS
    }

    fn check_params(&self, params: &Map<String, Value>) -> Result<()> {
        require_key(params)?;
        if let Some(signal) = params.get(JSON_KEY_SIGNAL)
            && !signal.is_i64()
            && !signal.is_u64()
        {
            return Err(ClusterlibError::invalid_arguments(format!(
                "'{JSON_KEY_SIGNAL}' must be an integer"
            )));
        }
        Ok(())
    }

    async fn invoke(
        &self,
        _name: &str,
        params: &[Value],
        _persistence: &dyn StatePersistence,
    ) -> Result<Value> {
        let param_obj = params.first().and_then(Value::as_object).ok_or_else(|| {
            ClusterlibError::rpc_invocation("stopProcess requires a parameter object")
        })?;
        let slot = resolve_process_slot(&self.factory, param_obj).await?;
        let desired = slot.cached_desired_state();
        if let Some(signal) = param_obj.get(JSON_KEY_SIGNAL) {
            desired.set(JSON_KEY_SIGNAL, signal.clone())?;
        }
        desired.set(PLK_STATE, Value::from(PLV_STATE_STOPPED))?;
        desired.publish(true).await?;
        Ok(serde_json::json!({
            JSON_KEY_NOTIFYABLE_KEY: slot.key(),
            PLK_STATE: PLV_STATE_STOPPED,
        }))
    }
}
