//! receive_worker.rs
//! Drains inbound frames from the device and republishes them on the bus.
//! - one dedicated thread, optionally at raised OS priority so the send pool cannot starve it
//! - each received frame gets a fresh DispatchControl so subscribers see one message shape
//! - read failures follow ReceiveErrorPolicy; a disconnected device always ends the loop

use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use log::{debug, error, info, warn};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::{
    bus::EventBus,
    device::CanDevice,
    frame::DispatchControl,
    receive::{ReceiveState, StateCell},
    utils::{
        config::ReceiveErrorPolicy,
        stats::DispatchStats,
        trace::{FrameRecorder, TraceEvent},
    },
};

pub struct BatchReceiveWorker {
    device: Arc<dyn CanDevice>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
    policy: ReceiveErrorPolicy,
    elevate_priority: bool,
    stop: Arc<AtomicBool>,
    state: Arc<StateCell>,
    received: Arc<AtomicU64>,
    stats: Arc<DispatchStats>,
    recorder: Option<Arc<FrameRecorder>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BatchReceiveWorker {
    pub fn new(
        device: Arc<dyn CanDevice>,
        bus: Arc<dyn EventBus>,
        timeout: Duration,
        policy: ReceiveErrorPolicy,
    ) -> Self {
        Self {
            device,
            bus,
            timeout,
            policy,
            elevate_priority: false,
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(StateCell::new()),
            received: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(DispatchStats::new()),
            recorder: None,
            thread: Mutex::new(None),
        }
    }

    pub fn with_priority(mut self, elevate: bool) -> Self {
        self.elevate_priority = elevate;
        self
    }

    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<FrameRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Start the receive thread. Returns `false` if it is already running
    /// or could not be spawned.
    pub fn receive(&self) -> bool {
        let mut slot = self.thread.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("[ReceiveWorker] already running");
            return false;
        }
        if let Some(old) = slot.take() {
            let _ = old.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        self.state.set(ReceiveState::Running);

        let receive_loop = ReceiveLoop {
            device: self.device.clone(),
            bus: self.bus.clone(),
            timeout: self.timeout,
            policy: self.policy,
            stop: self.stop.clone(),
            state: self.state.clone(),
            received: self.received.clone(),
            stats: self.stats.clone(),
            recorder: self.recorder.clone(),
        };

        let builder = thread::Builder::new().name("canbox-receive".into());
        let spawned = if self.elevate_priority {
            builder.spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    debug!("[ReceiveWorker] priority not raised: {:?}", e);
                }
                receive_loop.run();
            })
        } else {
            builder.spawn(move || receive_loop.run())
        };

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!("[ReceiveWorker] started (timeout {:?})", self.timeout);
                true
            }
            Err(e) => {
                error!("[ReceiveWorker] failed to spawn receive thread: {}", e);
                self.state.set(ReceiveState::Down);
                false
            }
        }
    }

    /// Ask the loop to exit once its current read returns.
    pub fn stop_receiving(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the receive thread to exit.
    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state.get()
    }

    pub fn frames_received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for BatchReceiveWorker {
    fn drop(&mut self) {
        self.stop_receiving();
        self.join();
    }
}

struct ReceiveLoop {
    device: Arc<dyn CanDevice>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
    policy: ReceiveErrorPolicy,
    stop: Arc<AtomicBool>,
    state: Arc<StateCell>,
    received: Arc<AtomicU64>,
    stats: Arc<DispatchStats>,
    recorder: Option<Arc<FrameRecorder>>,
}

impl ReceiveLoop {
    fn run(self) {
        let mut failures: u32 = 0;
        loop {
            let result = self.device.receive_block(self.timeout);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            match result {
                Ok(frames) => {
                    failures = 0;
                    if frames.is_empty() {
                        continue;
                    }
                    let n = frames.len() as u64;
                    for mut frame in frames {
                        frame.control = Some(Arc::new(DispatchControl::new()));
                        if let Some(rec) = &self.recorder {
                            rec.record(TraceEvent::rx(&frame));
                        }
                        self.bus.broadcast_msg(&frame);
                    }
                    self.received.fetch_add(n, Ordering::AcqRel);
                    self.stats.record_received(n);
                }
                Err(e) => {
                    self.stats.record_receive_error();
                    if e.is_fatal() {
                        error!("[ReceiveWorker] {}; receive path down", e);
                        self.state.set(ReceiveState::Down);
                        return;
                    }
                    match self.policy {
                        ReceiveErrorPolicy::Fatal => {
                            error!("[ReceiveWorker] {}; receive path down", e);
                            self.state.set(ReceiveState::Down);
                            return;
                        }
                        ReceiveErrorPolicy::Retry { max_retries, backoff_ms } => {
                            failures += 1;
                            if failures > max_retries {
                                error!(
                                    "[ReceiveWorker] {} consecutive read failures, last: {}; receive path down",
                                    failures, e
                                );
                                self.state.set(ReceiveState::Down);
                                return;
                            }
                            warn!(
                                "[ReceiveWorker] read failed ({}/{}): {}",
                                failures, max_retries, e
                            );
                            thread::sleep(retry_backoff(backoff_ms, failures));
                        }
                    }
                }
            }
        }
        self.state.set(ReceiveState::Stopped);
        debug!("[ReceiveWorker] stopped");
    }
}

/// Linear backoff before retry number `failures`, saturating on huge configs.
fn retry_backoff(backoff_ms: u64, failures: u32) -> Duration {
    Duration::from_millis(backoff_ms.saturating_mul(failures as u64))
}
