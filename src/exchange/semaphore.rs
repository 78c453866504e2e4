use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How a bounded wait resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A permit was available or arrived before the deadline.
    Signalled,
    /// The deadline passed without a permit.
    TimedOut,
    /// The semaphore was closed; every wait returns immediately from now on.
    Closed,
    /// An interrupt woke the wait. No permit was taken.
    Interrupted,
}

/// Counting signal shared between a frame producer and its consumer.
///
/// Abstracts the platform wait primitive behind one contract: `wait_timeout`
/// blocks for at most `timeout`, a `signal` with no waiter is kept for the
/// next wait, and `close` releases every current and future waiter.
/// Interrupts are kept apart from permits, so waking a consumer to stop it
/// never changes how many signals the next consumer sees.
pub trait BoundedWait: Send + Sync {
    /// Release one permit.
    fn signal(&self);

    /// Take one permit, blocking for at most `timeout`.
    fn wait_timeout(&self, timeout: Duration) -> WaitOutcome;

    /// Wake all waiters and make later waits return [`WaitOutcome::Closed`].
    fn close(&self);

    /// End the current wait, or the next one if nobody is waiting, with
    /// [`WaitOutcome::Interrupted`]. Repeated interrupts collapse into one.
    fn interrupt(&self);

    /// Withdraw an interrupt that no wait has consumed yet.
    fn cancel_interrupt(&self);
}

#[derive(Default)]
struct Permits {
    available: usize,
    closed: bool,
    interrupted: bool,
}

impl Permits {
    /// Resolve the wait if anything is pending. Close wins over an
    /// interrupt, which wins over a permit.
    fn settle(&mut self) -> Option<WaitOutcome> {
        if self.closed {
            Some(WaitOutcome::Closed)
        } else if self.interrupted {
            self.interrupted = false;
            Some(WaitOutcome::Interrupted)
        } else if self.available > 0 {
            self.available -= 1;
            Some(WaitOutcome::Signalled)
        } else {
            None
        }
    }
}

/// [`BoundedWait`] built on a mutex and condition variable.
#[derive(Default)]
pub struct CountingSemaphore {
    permits: Mutex<Permits>,
    cond: Condvar,
}

impl CountingSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits currently banked.
    pub fn available(&self) -> usize {
        self.permits.lock().available
    }
}

impl BoundedWait for CountingSemaphore {
    fn signal(&self) {
        let mut permits = self.permits.lock();
        permits.available = permits.available.saturating_add(1);
        self.cond.notify_one();
    }

    fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        loop {
            if let Some(outcome) = permits.settle() {
                return outcome;
            }
            if self.cond.wait_until(&mut permits, deadline).timed_out() {
                // A signal may have landed together with the timeout.
                return permits.settle().unwrap_or(WaitOutcome::TimedOut);
            }
        }
    }

    fn close(&self) {
        let mut permits = self.permits.lock();
        permits.closed = true;
        self.cond.notify_all();
    }

    fn interrupt(&self) {
        let mut permits = self.permits.lock();
        permits.interrupted = true;
        self.cond.notify_one();
    }

    fn cancel_interrupt(&self) {
        self.permits.lock().interrupted = false;
    }
}
