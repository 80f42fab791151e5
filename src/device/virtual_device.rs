//! virtual_device.rs
//! In-memory CAN adapter.
//! - optional loopback: every transmitted frame is queued for reception
//! - inject() simulates traffic from other nodes
//! - transmit log and fault injection for tests and benches

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::{
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    thread,
    time::Duration,
};
use log::debug;

use crate::{device::CanDevice, error::DeviceError, frame::CanMessage};

/// Upper bound on frames returned by one receive_block call.
const MAX_RX_BATCH: usize = 64;

pub struct VirtualCanDevice {
    opened: AtomicBool,
    channel_open: AtomicBool,
    disconnected: AtomicBool,
    loopback: bool,
    /// Simulated time on the wire per frame.
    frame_time: Duration,
    rx_in: Sender<CanMessage>,
    rx_out: Receiver<CanMessage>,
    tx_log: Mutex<Vec<CanMessage>>,
    tx_count: AtomicU64,
    fail_sends: AtomicU32,
    fail_receives: AtomicU32,
}

impl VirtualCanDevice {
    pub fn new() -> Self {
        let (rx_in, rx_out) = unbounded();
        Self {
            opened: AtomicBool::new(false),
            channel_open: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            loopback: false,
            frame_time: Duration::ZERO,
            rx_in,
            rx_out,
            tx_log: Mutex::new(Vec::new()),
            tx_count: AtomicU64::new(0),
            fail_sends: AtomicU32::new(0),
            fail_receives: AtomicU32::new(0),
        }
    }

    /// Adapter that hears its own transmissions.
    pub fn loopback() -> Self {
        Self {
            loopback: true,
            ..Self::new()
        }
    }

    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = frame_time;
        self
    }

    /// Queue a frame as if another node had sent it.
    pub fn inject(&self, msg: CanMessage) {
        let _ = self.rx_in.send(detached(&msg));
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_receives(&self, n: u32) {
        self.fail_receives.store(n, Ordering::SeqCst);
    }

    /// Simulate the adapter being unplugged.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire) && self.channel_open.load(Ordering::Acquire)
    }

    /// Frames transmitted so far, in order.
    pub fn sent(&self) -> Vec<CanMessage> {
        self.tx_log.lock().clone()
    }

    pub fn sent_count(&self) -> u64 {
        self.tx_count.load(Ordering::Acquire)
    }

    pub fn sent_for(&self, id: u32) -> usize {
        self.tx_log.lock().iter().filter(|m| m.id == id).count()
    }

    pub fn clear_log(&self) {
        self.tx_log.lock().clear();
    }

    fn check_link(&self) -> Result<(), DeviceError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(DeviceError::Disconnected);
        }
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }
        Ok(())
    }

    /// Consume one unit of an injected fault counter.
    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for VirtualCanDevice {
    fn default() -> Self {
        Self::new()
    }
}

// Frames leave the device without the sender's token.
fn detached(msg: &CanMessage) -> CanMessage {
    CanMessage {
        control: None,
        ..msg.clone()
    }
}

impl CanDevice for VirtualCanDevice {
    fn open(&self) -> Result<(), DeviceError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(DeviceError::Disconnected);
        }
        self.opened.store(true, Ordering::Release);
        debug!("[VirtualCanDevice] opened (loopback={})", self.loopback);
        Ok(())
    }

    fn open_channel(&self) -> Result<(), DeviceError> {
        if !self.opened.load(Ordering::Acquire) {
            return Err(DeviceError::NotOpen);
        }
        self.channel_open.store(true, Ordering::Release);
        Ok(())
    }

    fn close_channel(&self) -> Result<(), DeviceError> {
        self.channel_open.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.channel_open.store(false, Ordering::Release);
        self.opened.store(false, Ordering::Release);
        debug!("[VirtualCanDevice] closed after {} frames", self.sent_count());
        Ok(())
    }

    fn send(&self, msg: &CanMessage) -> Result<(), DeviceError> {
        self.check_link()?;
        if Self::take_fault(&self.fail_sends) {
            return Err(DeviceError::Transmit(format!("injected fault on {}", msg)));
        }
        if !self.frame_time.is_zero() {
            thread::sleep(self.frame_time);
        }
        self.tx_log.lock().push(msg.clone());
        self.tx_count.fetch_add(1, Ordering::AcqRel);
        if self.loopback {
            let _ = self.rx_in.send(detached(msg));
        }
        Ok(())
    }

    fn receive_block(&self, timeout: Duration) -> Result<Vec<CanMessage>, DeviceError> {
        self.check_link()?;
        if Self::take_fault(&self.fail_receives) {
            return Err(DeviceError::Receive("injected fault".into()));
        }
        let mut frames = Vec::new();
        match self.rx_out.recv_timeout(timeout) {
            Ok(first) => frames.push(first),
            Err(_) => return Ok(frames),
        }
        while frames.len() < MAX_RX_BATCH {
            match self.rx_out.try_recv() {
                Ok(msg) => frames.push(msg),
                Err(_) => break,
            }
        }
        Ok(frames)
    }
}
