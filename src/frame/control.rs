//! control.rs
//! Cancellation token shared between a submitted batch and the pool thread running it.
//! - monotonic flag: once cancelled, never un-cancelled
//! - interruptible sleep so loop intervals end as soon as a batch is stopped
//! - child tokens: cancelling a group token cancels every token derived from it

use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
pub struct DispatchControl {
    cancelled: AtomicBool,
    send_from: Option<String>,
    gate: Mutex<()>,
    wake: Condvar,
    children: Mutex<Vec<Weak<DispatchControl>>>,
}

impl DispatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token tagged with the logical sender that owns it.
    pub fn tagged(send_from: impl Into<String>) -> Self {
        Self {
            send_from: Some(send_from.into()),
            ..Self::default()
        }
    }

    /// Token that is cancelled with `parent` but can also be cancelled alone.
    /// Inherits the parent's tag.
    pub fn child(parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self {
            send_from: parent.send_from.clone(),
            ..Self::default()
        });
        {
            let mut children = parent.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Parent cancelled concurrently: its drain may have missed us.
        if parent.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn send_from(&self) -> Option<&str> {
        self.send_from.as_deref()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        let flipped = self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if flipped {
            // Take the gate so a sleeper between its flag check and wait() cannot miss us.
            {
                let _guard = self.gate.lock();
                self.wake.notify_all();
            }
            let children: Vec<_> = self.children.lock().drain(..).collect();
            for child in children.iter().filter_map(Weak::upgrade) {
                child.cancel();
            }
        }
        flipped
    }

    /// Sleep for up to `duration`, returning early if cancelled.
    /// Returns `false` when the token is (or becomes) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        let deadline = Instant::now() + duration;
        let mut guard = self.gate.lock();
        while !self.is_cancelled() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        !self.is_cancelled()
    }
}
