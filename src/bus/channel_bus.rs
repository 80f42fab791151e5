//! channel_bus.rs
//! EventBus over bounded crossbeam channels, one per subscriber.
//! - non-blocking try_send: a full subscriber loses the event (counted)
//! - disconnected subscribers are pruned on the next broadcast

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use log::trace;

use crate::{
    bus::{BusEvent, EventBus, KeyEvent},
    frame::CanMessage,
};

#[derive(Default)]
pub struct ChannelBus {
    subscribers: Mutex<Vec<Sender<BusEvent>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with its own queue of `capacity` events.
    pub fn subscribe(&self, capacity: usize) -> Receiver<BusEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, event: BusEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("[ChannelBus] pruning closed subscriber");
                false
            }
        });
    }
}

impl EventBus for ChannelBus {
    fn broadcast_msg(&self, msg: &CanMessage) {
        self.publish(BusEvent::Frame(msg.clone()));
    }

    fn broadcast_key_event(&self, event: &KeyEvent) {
        self.publish(BusEvent::Key(event.clone()));
    }
}
