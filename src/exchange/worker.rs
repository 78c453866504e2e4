use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::FrameBuffer;
use super::queue::FrameExchangeQueue;

/// Callback receiving each valid frame drained by an [`ExportWorker`].
pub type FrameSink = Box<dyn FnMut(FrameBuffer) + Send>;

/// Consumer thread for the export path of a [`FrameExchangeQueue`].
///
/// Loops on `pop(true)`, so it sleeps in the queue's bounded wait between
/// frames, and hands every valid frame to the sink. The sink runs on the
/// worker thread, which makes that thread the natural owner of a renderer.
pub struct ExportWorker {
    name: String,
    queue: Arc<FrameExchangeQueue>,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl ExportWorker {
    /// Spawn the worker thread.
    pub fn spawn(
        name: impl Into<String>,
        queue: Arc<FrameExchangeQueue>,
        mut sink: FrameSink,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let delivered = Arc::new(AtomicU64::new(0));

        let thread = {
            let name_clone = name.clone();
            let queue_clone = Arc::clone(&queue);
            let running_clone = Arc::clone(&running);
            let delivered_clone = Arc::clone(&delivered);

            std::thread::Builder::new()
                .name(format!("export-{name}"))
                .spawn(move || {
                    info!("export worker starting for {name_clone}");
                    while running_clone.load(Ordering::Acquire) {
                        let frame = queue_clone.pop(true);
                        if queue_clone.is_disposed() {
                            debug!("queue disposed, export worker {name_clone} leaving");
                            break;
                        }
                        if frame.is_valid() {
                            delivered_clone.fetch_add(1, Ordering::Relaxed);
                            sink(frame);
                        }
                    }
                    running_clone.store(false, Ordering::Release);
                    info!("export worker exiting for {name_clone}");
                })?
        };

        Ok(Self {
            name,
            queue,
            running,
            delivered,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the worker loop is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of frames handed to the sink so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Stop the worker and join its thread. Idempotent.
    ///
    /// The worker is woken with an interrupt rather than a permit; if it
    /// was busy in the sink and never waited again, the interrupt is
    /// withdrawn so the next consumer of the queue waits normally.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            self.queue.interrupt();
            if handle.join().is_err() {
                warn!("export worker {} panicked", self.name);
            }
            self.queue.cancel_interrupt();
        }
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
