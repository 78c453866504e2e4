//! Where rendered frames go: a bound display surface and the export slot.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::render::backend::TextureHandle;
use crate::render::filters::FilterKind;

/// Platform display surface the renderer draws into.
///
/// The renderer only keeps a `Weak` reference; dropping the last `Arc`
/// unbinds the surface implicitly.
pub trait DisplayTarget: Send + Sync {
    /// Drawable size in pixels, or `None` while the surface is not ready.
    fn surface_size(&self) -> Option<(u32, u32)>;

    /// Receive the terminal output of one render.
    fn present(&self, frame: &PresentedFrame<'_>);
}

/// One rendered frame handed to a [`DisplayTarget`].
#[derive(Debug, Clone, Copy)]
pub struct PresentedFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub frame_time_us: u64,
}

/// CPU copy of an exported render result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_time_us: u64,
    /// Monotonic export counter, starting at 1.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct ExportSlot {
    latest: Option<ExportedFrame>,
    published: u64,
}

/// Cloneable, thread-safe reader of the most recent export.
///
/// The renderer writes into a texture of its own before reading it back, so
/// readers never observe a frame that is still being rendered.
#[derive(Debug, Clone, Default)]
pub struct ExportReader {
    slot: Arc<Mutex<ExportSlot>>,
}

impl ExportReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest export, left in place.
    pub fn latest(&self) -> Option<ExportedFrame> {
        self.slot.lock().latest.clone()
    }

    /// Latest export, removed from the slot.
    pub fn take(&self) -> Option<ExportedFrame> {
        self.slot.lock().latest.take()
    }

    /// Number of exports published so far.
    pub fn published(&self) -> u64 {
        self.slot.lock().published
    }

    pub(crate) fn publish(&self, pixels: Vec<u8>, width: u32, height: u32, frame_time_us: u64) {
        let mut slot = self.slot.lock();
        slot.published += 1;
        slot.latest = Some(ExportedFrame {
            pixels,
            width,
            height,
            frame_time_us,
            sequence: slot.published,
        });
    }
}

/// The graph's terminal node, exposed for external composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSource {
    pub kind: FilterKind,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}
