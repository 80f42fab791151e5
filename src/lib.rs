//! # canbox
//! Concurrent CAN batch dispatch.
//!
//! - **Send:** batches run on a bounded thread pool; at most one live batch per
//!   arbitration ID, newest submission wins.
//! - **Receive:** a dedicated thread drains the adapter and republishes every
//!   frame on the event bus.
//! - **Keys:** same pattern for keyboard events.
//!
//! Cancellation is cooperative through a shared `DispatchControl` checked at
//! pass boundaries. Device, bus and key source are traits so adapters and
//! subscribers can be swapped; `VirtualCanDevice` and `ChannelBus` are the
//! in-process implementations.

pub mod bus;
pub mod canbox;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod receive;
pub mod utils;

pub use bus::{BusEvent, ChannelBus, EventBus, KeyEvent};
pub use canbox::ConcurrentCanBox;
pub use device::{CanDevice, VirtualCanDevice};
pub use dispatch::{BatchSendWorker, SendHandle, SendOutcome, SendState};
pub use error::{ConfigError, DeviceError, PoolError, SubmitError};
pub use frame::{Batch, CanMessage, DispatchControl, LoopCount};
pub use receive::{BatchReceiveWorker, ChannelKeySource, KeySource, KeyWorker, ReceiveState};
pub use utils::config::{CanBoxConfig, ReceiveErrorPolicy, SendErrorPolicy};
