use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::frame::{FrameBuffer, FrameMetadata};
use super::semaphore::{BoundedWait, CountingSemaphore, WaitOutcome};
use crate::diagnostics::stats::{DiagnosticSnapshot, DiagnosticStats};
use crate::settings::types::ExchangeSettings;

/// Lifecycle of a [`FrameExchangeQueue`]. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Active,
    Disposed,
}

/// Bounded hand-off of raw frames from a capture thread to a consumer.
///
/// Producers never block: once `capacity` frames are waiting, each push
/// evicts the oldest one. Consumers that pass `export = true` to [`pop`]
/// wait on a counting signal for at most the configured timeout; the
/// signal only says "data may be available", the store itself is guarded
/// by its own lock.
///
/// Construct one per pipeline and share it through an `Arc`.
///
/// [`pop`]: FrameExchangeQueue::pop
pub struct FrameExchangeQueue {
    frames: Mutex<VecDeque<FrameBuffer>>,
    capacity: usize,
    wait_timeout: Duration,
    ready: Arc<dyn BoundedWait>,
    disposed: AtomicBool,
    stats: Mutex<DiagnosticStats>,
}

impl FrameExchangeQueue {
    /// Default number of in-flight frames.
    pub const DEFAULT_CAPACITY: usize = 2;

    /// Default bound on the export wait.
    pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Create a queue with the default capacity and timeout.
    pub fn new() -> Self {
        Self::with_settings(&ExchangeSettings::default())
    }

    /// Create a queue from settings, using a [`CountingSemaphore`].
    pub fn with_settings(settings: &ExchangeSettings) -> Self {
        Self::with_signal(settings, Arc::new(CountingSemaphore::new()))
    }

    /// Create a queue that waits on a caller-supplied signal.
    pub fn with_signal(settings: &ExchangeSettings, ready: Arc<dyn BoundedWait>) -> Self {
        let capacity = settings.capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            wait_timeout: settings.wait_timeout(),
            ready,
            disposed: AtomicBool::new(false),
            stats: Mutex::new(DiagnosticStats::new()),
        }
    }

    /// Copy `bytes` into the queue as a new frame.
    ///
    /// Evicts the oldest waiting frame when the queue is full. With
    /// `export` set, releases one permit so a waiting exporter wakes up.
    pub fn push(&self, bytes: &[u8], meta: FrameMetadata, export: bool) {
        if self.is_disposed() {
            debug!("push after dispose ignored ({} bytes)", bytes.len());
            return;
        }

        let frame = FrameBuffer::copy_from(bytes, meta);
        {
            let mut frames = self.frames.lock();
            // dispose may have cleared the store since the check above.
            if self.is_disposed() {
                debug!("push raced dispose; frame dropped");
                return;
            }
            let mut stats = self.stats.lock();
            if frames.len() >= self.capacity {
                if let Some(evicted) = frames.pop_front() {
                    trace!(
                        timestamp_us = evicted.timestamp_us(),
                        "evicting unconsumed frame"
                    );
                    stats.record_drop();
                }
            }
            stats.record_frame(frame.len());
            frames.push_back(frame);
        }

        if export {
            self.ready.signal();
        }
    }

    /// Take the oldest waiting frame.
    ///
    /// With `export` set, first waits up to the configured timeout for a
    /// push signal. Whether the wait is signalled, times out, or is cut
    /// short by [`dispose`], the queue is then drained the same way: the
    /// oldest frame if there is one, otherwise [`FrameBuffer::empty`].
    ///
    /// [`dispose`]: FrameExchangeQueue::dispose
    pub fn pop(&self, export: bool) -> FrameBuffer {
        if self.is_disposed() {
            return FrameBuffer::empty();
        }

        if export {
            match self.ready.wait_timeout(self.wait_timeout) {
                WaitOutcome::Signalled => {}
                WaitOutcome::TimedOut => {
                    trace!(
                        timeout_ms = self.wait_timeout.as_millis() as u64,
                        "export wait timed out"
                    );
                }
                WaitOutcome::Closed => {
                    trace!("export wait released by dispose");
                }
                WaitOutcome::Interrupted => {
                    trace!("export wait interrupted");
                }
            }
        }

        let frame = self.frames.lock().pop_front();
        let mut stats = self.stats.lock();
        match frame {
            Some(frame) => {
                if let Some(waited) = frame.queued_for() {
                    stats.record_delivery(waited);
                }
                frame
            }
            None => {
                stats.record_empty_pop();
                FrameBuffer::empty()
            }
        }
    }

    /// Release one permit without pushing a frame.
    ///
    /// The permit stays banked until some `pop(true)` takes it; use
    /// [`interrupt`](Self::interrupt) to wake a consumer that is stopping.
    pub fn notify(&self) {
        self.ready.signal();
    }

    /// Cut the current (or next) export wait short without banking a
    /// permit. The woken consumer drains the queue as after a timeout.
    pub fn interrupt(&self) {
        self.ready.interrupt();
    }

    /// Withdraw an [`interrupt`](Self::interrupt) nobody consumed.
    pub fn cancel_interrupt(&self) {
        self.ready.cancel_interrupt();
    }

    /// Tear the queue down. Idempotent.
    ///
    /// Releases any blocked exporter immediately, makes every later wait
    /// return at once, and drops all frames still held.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready.close();
        let dropped = {
            let mut frames = self.frames.lock();
            let n = frames.len();
            frames.clear();
            n
        };
        debug!(dropped, "frame exchange disposed");
    }

    pub fn state(&self) -> ExchangeState {
        if self.is_disposed() {
            ExchangeState::Disposed
        } else {
            ExchangeState::Active
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of frames waiting.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Take a snapshot of hand-off statistics.
    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.stats.lock().snapshot()
    }
}

impl Default for FrameExchangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameExchangeQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}
