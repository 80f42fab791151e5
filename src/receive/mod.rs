//! Dedicated background consumers: device frames and key events.
//!
//! Both workers block on a timed read in their own thread and stop
//! cooperatively: the stop flag is checked when the read returns, so shutdown
//! latency is bounded by the read timeout.

use std::sync::atomic::{AtomicU8, Ordering};

pub mod key_worker;
pub mod receive_worker;

pub use key_worker::{ChannelKeySource, KeySource, KeyWorker};
pub use receive_worker::BatchReceiveWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiveState {
    /// Never started.
    Idle = 0,
    Running = 1,
    /// Exited after stop was requested.
    Stopped = 2,
    /// Exited because reads kept failing or the device went away.
    Down = 3,
}

/// Lock-free cell holding a `ReceiveState`.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ReceiveState::Idle as u8))
    }

    pub(crate) fn set(&self, state: ReceiveState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> ReceiveState {
        match self.0.load(Ordering::Acquire) {
            1 => ReceiveState::Running,
            2 => ReceiveState::Stopped,
            3 => ReceiveState::Down,
            _ => ReceiveState::Idle,
        }
    }
}
