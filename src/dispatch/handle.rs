//! handle.rs
//! Caller-side view of one submitted batch: wait for it, stop it, inspect progress.

use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{dispatch::registry::SendRegistry, frame::DispatchControl};

/// How a batch's run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every pass ran.
    Completed,
    /// Stopped by `stop_sending()`, pre-emption or teardown.
    Cancelled,
    /// The device failed in a way the batch could not continue past.
    Failed(String),
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Completed => write!(f, "completed"),
            SendOutcome::Cancelled => write!(f, "cancelled"),
            SendOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Submitted,
    Running,
    Completed,
    Cancelled,
    Failed,
}

struct HandleShared {
    token: u64,
    key: u32,
    control: Arc<DispatchControl>,
    registry: Weak<SendRegistry>,
    started: AtomicBool,
    outcome: Mutex<Option<SendOutcome>>,
    done: Condvar,
    passes: AtomicU64,
    frames: AtomicU64,
}

#[derive(Clone)]
pub struct SendHandle {
    shared: Arc<HandleShared>,
}

impl SendHandle {
    pub(crate) fn new(
        token: u64,
        key: u32,
        control: Arc<DispatchControl>,
        registry: Weak<SendRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                token,
                key,
                control,
                registry,
                started: AtomicBool::new(false),
                outcome: Mutex::new(None),
                done: Condvar::new(),
                passes: AtomicU64::new(0),
                frames: AtomicU64::new(0),
            }),
        }
    }

    /// Registry key (arbitration ID or explicit stream key).
    pub fn key(&self) -> u32 {
        self.shared.key
    }

    /// Unique per submission; distinguishes successive batches on one key.
    pub fn token(&self) -> u64 {
        self.shared.token
    }

    /// This submission's own token; frames of the batch carry it.
    pub fn control(&self) -> &Arc<DispatchControl> {
        &self.shared.control
    }

    pub fn outcome(&self) -> Option<SendOutcome> {
        self.shared.outcome.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.outcome.lock().is_some()
    }

    pub fn state(&self) -> SendState {
        match &*self.shared.outcome.lock() {
            Some(SendOutcome::Completed) => SendState::Completed,
            Some(SendOutcome::Cancelled) => SendState::Cancelled,
            Some(SendOutcome::Failed(_)) => SendState::Failed,
            None if self.shared.started.load(Ordering::Acquire) => SendState::Running,
            None => SendState::Submitted,
        }
    }

    pub fn passes_completed(&self) -> u64 {
        self.shared.passes.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Ask the run loop to stop and drop this batch from the registry.
    /// Safe to call any number of times, before or after the batch ends.
    pub fn stop_sending(&self) {
        self.shared.control.cancel();
        if let Some(registry) = self.shared.registry.upgrade() {
            registry.remove_if_current(self.shared.key, self.shared.token);
        }
    }

    /// Block until the batch ends or `timeout` elapses. `None` waits forever.
    /// Returns the outcome, or `None` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<SendOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outcome = self.shared.outcome.lock();
        while outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.shared.done.wait_until(&mut outcome, deadline).timed_out() {
                        break;
                    }
                }
                None => self.shared.done.wait(&mut outcome),
            }
        }
        outcome.clone()
    }

    /// Bounded wait for completion.
    pub fn after(&self, timeout: Duration) -> Option<SendOutcome> {
        self.wait(Some(timeout))
    }

    /// Let the batch run for up to `timeout`, then stop it.
    /// Returns the final outcome once the run loop acknowledges, or `None` if it
    /// has not within a further `timeout`.
    pub fn stop_after(&self, timeout: Duration) -> Option<SendOutcome> {
        if let Some(outcome) = self.wait(Some(timeout)) {
            return Some(outcome);
        }
        self.stop_sending();
        self.wait(Some(timeout))
    }

    pub(crate) fn mark_running(&self) {
        self.shared.started.store(true, Ordering::Release);
    }

    pub(crate) fn record_pass(&self) {
        self.shared.passes.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_frame(&self) {
        self.shared.frames.fetch_add(1, Ordering::AcqRel);
    }

    /// Set the terminal outcome once and wake all waiters.
    pub(crate) fn finish(&self, outcome: SendOutcome) -> bool {
        let mut slot = self.shared.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.shared.done.notify_all();
        true
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle")
            .field("key", &format_args!("0x{:X}", self.shared.key))
            .field("token", &self.shared.token)
            .field("state", &self.state())
            .finish()
    }
}
