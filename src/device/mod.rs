//! CAN adapter contract.
//!
//! The dispatch engine only needs lifecycle calls, a blocking single-frame
//! transmit and a timed batch receive. Adapters are shared by every pool
//! thread and the receive thread, so all methods take `&self`.

use std::time::Duration;

use crate::{error::DeviceError, frame::CanMessage};

pub mod virtual_device;

pub use virtual_device::VirtualCanDevice;

pub trait CanDevice: Send + Sync {
    fn open(&self) -> Result<(), DeviceError>;
    fn open_channel(&self) -> Result<(), DeviceError>;
    fn close_channel(&self) -> Result<(), DeviceError>;
    fn close(&self) -> Result<(), DeviceError>;

    /// Transmit one frame. May block on the adapter.
    fn send(&self, msg: &CanMessage) -> Result<(), DeviceError>;

    /// Block up to `timeout` and return whatever frames arrived, possibly none.
    fn receive_block(&self, timeout: Duration) -> Result<Vec<CanMessage>, DeviceError>;
}
