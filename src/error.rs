//! Error types shared across the dispatch engine.
//!
//! Each enum covers one failure domain: batch submission, the CAN adapter,
//! the send pool and configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Reasons a batch is rejected by `send()` before it reaches the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The batch has no messages to send.
    #[error("batch has no messages")]
    EmptyBatch,
    /// A message asks for zero repeats per pass.
    #[error("message 0x{id:X} has a repeat count of zero")]
    ZeroRepeat { id: u32 },
    /// A payload exceeds the largest CAN FD frame.
    #[error("message 0x{id:X} carries {len} bytes, limit is {max}")]
    PayloadTooLong { id: u32, len: usize, max: usize },
    /// The worker pool was shut down by `kill()`.
    #[error("send pool is shut down")]
    PoolClosed,
}

/// Failures reported by a CAN adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device or channel is not open")]
    NotOpen,
    #[error("transmit failed: {0}")]
    Transmit(String),
    #[error("receive failed: {0}")]
    Receive(String),
    /// The adapter is gone; no further I/O will succeed.
    #[error("device disconnected")]
    Disconnected,
}

impl DeviceError {
    /// Errors after which the adapter cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Disconnected)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

impl From<PoolError> for SubmitError {
    fn from(_: PoolError) -> Self {
        SubmitError::PoolClosed
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
