// Frame exchange: bounded hand-off of raw camera frames between threads.

pub mod frame;
pub mod queue;
pub mod semaphore;
pub mod worker;

pub use frame::{FrameBuffer, FrameMetadata, Roi};
pub use queue::{ExchangeState, FrameExchangeQueue};
pub use semaphore::{BoundedWait, CountingSemaphore, WaitOutcome};
pub use worker::{ExportWorker, FrameSink};
