// Batch dispatch: pooled senders, per-key registry and caller handles.

pub mod handle;
pub mod pool;
pub mod registry;
pub mod send_worker;

pub use handle::{SendHandle, SendOutcome, SendState};
pub use pool::WorkerPool;
pub use registry::SendRegistry;
pub use send_worker::BatchSendWorker;
