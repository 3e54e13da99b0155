// src/config.rs

//! Library configuration: ensemble address, timeouts, and cache policy,
//! loadable from a TOML file and `CLUSTERLIB_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::core::errors::{ClusterlibError, Result};

/// Configuration for a [`crate::Factory`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterlibConfig {
    /// Coordination ensemble list, `host:port[,host:port...]`.  Consumed
    /// by the concrete store client; carried here so one config covers the
    /// whole stack.
    #[serde(default = "default_registry_address")]
    pub registry_address: String,

    /// How long the store client may take to establish a session.
    #[serde(default = "default_connect_timeout_msecs")]
    pub connect_timeout_msecs: u64,

    /// Default bound on published state history entries.
    #[serde(default = "default_max_history_size")]
    pub default_max_history_size: i32,

    /// Poll interval of the JSON-RPC server and response-router loops.
    #[serde(default = "default_rpc_poll_msecs")]
    pub rpc_poll_msecs: u64,
}

fn default_registry_address() -> String {
    "localhost:2181".to_string()
}

fn default_connect_timeout_msecs() -> u64 {
    30_000
}

fn default_max_history_size() -> i32 {
    crate::core::constants::DEFAULT_MAX_HISTORY_SIZE
}

fn default_rpc_poll_msecs() -> u64 {
    200
}

impl Default for ClusterlibConfig {
    fn default() -> Self {
        Self {
            registry_address: default_registry_address(),
            connect_timeout_msecs: default_connect_timeout_msecs(),
            default_max_history_size: default_max_history_size(),
            rpc_poll_msecs: default_rpc_poll_msecs(),
        }
    }
}

impl ClusterlibConfig {
    /// Loads configuration from an optional TOML file overlaid with
    /// `CLUSTERLIB_*` environment variables.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("CLUSTERLIB"));
        let loaded: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                ClusterlibError::invalid_arguments(format!("configuration error: {e}"))
            })?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry_address.is_empty() {
            return Err(ClusterlibError::invalid_arguments(
                "registry_address cannot be empty",
            ));
        }
        if self.default_max_history_size < 1 {
            return Err(ClusterlibError::invalid_arguments(
                "default_max_history_size must be at least 1",
            ));
        }
        if self.rpc_poll_msecs == 0 {
            return Err(ClusterlibError::invalid_arguments(
                "rpc_poll_msecs must be positive",
            ));
        }
        Ok(())
    }
}
