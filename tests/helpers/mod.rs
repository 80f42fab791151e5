/// Test doubles for the device and bus collaborators.
use canbox::{CanDevice, CanMessage, DeviceError, EventBus, KeyEvent};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    thread,
    time::{Duration, Instant},
};

#[allow(dead_code)]
/// Bus that keeps every broadcast for later inspection.
#[derive(Default)]
pub struct RecordingBus {
    pub frames: Mutex<Vec<CanMessage>>,
    pub keys: Mutex<Vec<KeyEvent>>,
}

impl EventBus for RecordingBus {
    fn broadcast_msg(&self, msg: &CanMessage) {
        self.frames.lock().push(msg.clone());
    }

    fn broadcast_key_event(&self, event: &KeyEvent) {
        self.keys.lock().push(event.clone());
    }
}

#[allow(dead_code)]
impl RecordingBus {
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

#[allow(dead_code)]
/// Device whose receive side replays a fixed script, one entry per read.
/// Each read takes the full timeout before returning its entry.
pub struct ScriptedDevice {
    script: Mutex<VecDeque<Result<Vec<CanMessage>, DeviceError>>>,
    pub reads: Mutex<u32>,
}

#[allow(dead_code)]
impl ScriptedDevice {
    pub fn new(script: Vec<Result<Vec<CanMessage>, DeviceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            reads: Mutex::new(0),
        }
    }
}

impl CanDevice for ScriptedDevice {
    fn open(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn open_channel(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close_channel(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn send(&self, _msg: &CanMessage) -> Result<(), DeviceError> {
        Ok(())
    }

    fn receive_block(&self, timeout: Duration) -> Result<Vec<CanMessage>, DeviceError> {
        thread::sleep(timeout);
        *self.reads.lock() += 1;
        self.script.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[allow(dead_code)]
/// Poll `cond` until it holds or a few seconds pass.
pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
