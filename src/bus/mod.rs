//! Fan-out point for frames and key events.
//!
//! Workers broadcast from pool threads and from the receive thread; an
//! `EventBus` must accept calls from any thread without blocking on slow
//! subscribers.

use std::time::Instant;

use crate::frame::CanMessage;

pub mod channel_bus;

pub use channel_bus::ChannelBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub at: Instant,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    Frame(CanMessage),
    Key(KeyEvent),
}

pub trait EventBus: Send + Sync {
    fn broadcast_msg(&self, msg: &CanMessage);
    fn broadcast_key_event(&self, event: &KeyEvent);
}
