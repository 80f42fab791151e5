//! Runtime configuration for the dispatch engine.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! pool_size = 11
//! receive_timeout_ms = 100
//! send_error_policy = "log_and_continue"
//! receive_error_policy = { mode = "retry", max_retries = 3, backoff_ms = 50 }
//! trace_csv = "data/logs/can_trace.csv"
//! ```

use serde::Deserialize;
use std::{fs, path::{Path, PathBuf}, time::Duration};

use crate::error::ConfigError;

pub const DEFAULT_POOL_SIZE: usize = 11;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_KEY_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// What a batch does when the device rejects one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorPolicy {
    #[default]
    LogAndContinue,
    AbortBatch,
}

/// What the receive loop does when a device read fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReceiveErrorPolicy {
    #[default]
    Fatal,
    /// Retry with linear backoff; give up after `max_retries` consecutive failures.
    Retry { max_retries: u32, backoff_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CanBoxConfig {
    pub pool_size: usize,
    pub receive_timeout_ms: u64,
    pub key_timeout_ms: u64,
    pub send_error_policy: SendErrorPolicy,
    pub receive_error_policy: ReceiveErrorPolicy,
    /// Ask the OS for maximum priority on the receive thread (best effort).
    pub elevate_receive_priority: bool,
    pub bus_capacity: usize,
    pub trace_csv: Option<PathBuf>,
}

impl Default for CanBoxConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            key_timeout_ms: DEFAULT_KEY_TIMEOUT_MS,
            send_error_policy: SendErrorPolicy::default(),
            receive_error_policy: ReceiveErrorPolicy::default(),
            elevate_receive_priority: false,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            trace_csv: None,
        }
    }
}

impl CanBoxConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CanBoxConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid("receive_timeout_ms must be positive".into()));
        }
        if self.key_timeout_ms == 0 {
            return Err(ConfigError::Invalid("key_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn key_timeout(&self) -> Duration {
        Duration::from_millis(self.key_timeout_ms)
    }
}
