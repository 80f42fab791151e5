// Frame model: what gets sent, how often, and the token that stops it.

pub mod batch;
pub mod control;
pub mod message;

pub use batch::{Batch, LoopCount};
pub use control::DispatchControl;
pub use message::{CanMessage, MAX_DATA_LENGTH};
