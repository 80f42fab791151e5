//! key_worker.rs
//! Same template as the receive worker, over a blocking keyboard read.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use log::{debug, error, warn};

use crate::{
    bus::{EventBus, KeyEvent},
    error::DeviceError,
    receive::{ReceiveState, StateCell},
};

/// Blocking source of key events.
pub trait KeySource: Send + Sync {
    /// Wait up to `timeout` for the next event; `Ok(None)` on timeout.
    fn read_key(&self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError>;
}

/// Key source fed through a channel, e.g. by a thread reading stdin.
pub struct ChannelKeySource {
    rx: Receiver<KeyEvent>,
}

impl ChannelKeySource {
    pub fn pair() -> (Sender<KeyEvent>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { rx })
    }
}

impl KeySource for ChannelKeySource {
    fn read_key(&self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }
}

pub struct KeyWorker {
    source: Arc<dyn KeySource>,
    bus: Arc<dyn EventBus>,
    timeout: Duration,
    stop: Arc<AtomicBool>,
    state: Arc<StateCell>,
    events: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl KeyWorker {
    pub fn new(source: Arc<dyn KeySource>, bus: Arc<dyn EventBus>, timeout: Duration) -> Self {
        Self {
            source,
            bus,
            timeout,
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(StateCell::new()),
            events: Arc::new(AtomicU64::new(0)),
            thread: Mutex::new(None),
        }
    }

    /// Start the key thread; `false` if already running or the spawn failed.
    pub fn start(&self) -> bool {
        let mut slot = self.thread.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        if let Some(old) = slot.take() {
            let _ = old.join();
        }
        self.stop.store(false, Ordering::SeqCst);
        self.state.set(ReceiveState::Running);

        let source = self.source.clone();
        let bus = self.bus.clone();
        let timeout = self.timeout;
        let stop = self.stop.clone();
        let state = self.state.clone();
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name("canbox-keys".into())
            .spawn(move || {
                loop {
                    let result = source.read_key(timeout);
                    if stop.load(Ordering::SeqCst) {
                        state.set(ReceiveState::Stopped);
                        break;
                    }
                    match result {
                        Ok(Some(event)) => {
                            bus.broadcast_key_event(&event);
                            events.fetch_add(1, Ordering::AcqRel);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("[KeyWorker] key source closed: {}", e);
                            state.set(ReceiveState::Down);
                            break;
                        }
                    }
                }
                debug!("[KeyWorker] exiting");
            });

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                true
            }
            Err(e) => {
                error!("[KeyWorker] failed to spawn key thread: {}", e);
                self.state.set(ReceiveState::Down);
                false
            }
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state.get()
    }

    pub fn events_broadcast(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }
}

impl Drop for KeyWorker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, ChannelBus};
    use std::time::Instant;

    #[test]
    fn key_events_are_broadcast_until_stopped() {
        let (keys, source) = ChannelKeySource::pair();
        let bus = Arc::new(ChannelBus::new());
        let rx = bus.subscribe(8);
        let worker = KeyWorker::new(Arc::new(source), bus.clone(), Duration::from_millis(10));
        assert!(worker.start());
        assert!(!worker.start());

        keys.send(KeyEvent::new("q")).unwrap();
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(BusEvent::Key(k)) => assert_eq!(k.key, "q"),
            other => panic!("unexpected {:?}", other),
        }

        let start = Instant::now();
        worker.stop();
        worker.join();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(worker.state(), ReceiveState::Stopped);
        assert_eq!(worker.events_broadcast(), 1);
    }

    #[test]
    fn closed_source_takes_worker_down() {
        let (keys, source) = ChannelKeySource::pair();
        let bus = Arc::new(ChannelBus::new());
        let worker = KeyWorker::new(Arc::new(source), bus, Duration::from_millis(10));
        worker.start();
        drop(keys);
        worker.join();
        assert_eq!(worker.state(), ReceiveState::Down);
    }
}
