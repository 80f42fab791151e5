//! message.rs
//! One CAN frame plus its repeat schedule inside a batch pass.

use std::{fmt, sync::Arc, time::Duration};

use crate::frame::control::DispatchControl;

/// Largest payload accepted (CAN FD).
pub const MAX_DATA_LENGTH: usize = 64;

/// Highest 11-bit identifier; anything above needs the extended format.
pub const MAX_STD_ID: u32 = 0x7FF;

#[derive(Debug, Clone)]
pub struct CanMessage {
    pub id: u32,
    pub data: Vec<u8>,
    /// Times this frame is sent within one pass.
    pub count: u32,
    /// Gap between consecutive repeats.
    pub interval: Duration,
    /// Token of the batch (or receive cycle) this frame currently belongs to.
    pub control: Option<Arc<DispatchControl>>,
}

impl CanMessage {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
            count: 1,
            interval: Duration::ZERO,
            control: None,
        }
    }

    pub fn with_repeat(mut self, count: u32, interval: Duration) -> Self {
        self.count = count;
        self.interval = interval;
        self
    }

    pub fn is_extended(&self) -> bool {
        self.id > MAX_STD_ID
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once the owning batch has been told to stop.
    pub fn is_cancelled(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.is_cancelled())
    }

    pub(crate) fn attach(&mut self, control: &Arc<DispatchControl>) {
        self.control = Some(control.clone());
    }

    /// Frames compare by identity and payload; schedule and token are ignored.
    pub fn same_frame(&self, other: &CanMessage) -> bool {
        self.id == other.id && self.data == other.data
    }

    pub fn data_hex(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}:[{}]", self.id, self.data_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_id_and_payload() {
        let msg = CanMessage::new(0x100, [1, 2]);
        assert_eq!(msg.to_string(), "0x100:[01 02]");
        assert!(!msg.is_extended());
        assert!(CanMessage::new(0x18FF_0001, []).is_extended());
    }

    #[test]
    fn cancellation_follows_attached_control() {
        let ctrl = Arc::new(DispatchControl::new());
        let mut msg = CanMessage::new(0x10, [0xAA]).with_repeat(3, Duration::from_millis(1));
        assert!(!msg.is_cancelled());
        msg.attach(&ctrl);
        assert!(!msg.is_cancelled());
        ctrl.cancel();
        assert!(msg.is_cancelled());
        assert_eq!(msg.count, 3);
    }
}
