use std::time::Instant;

/// Normalized region of interest inside a frame.
///
/// All four fields are fractions of the full frame, so `(0, 0, 1, 1)`
/// covers the whole image regardless of its pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Roi {
    /// The whole frame.
    pub const FULL: Roi = Roi {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// All-zero ROI carried by the empty sentinel.
    pub const ZERO: Roi = Roi {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the region covers no area.
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Map the region onto a `width` x `height` pixel grid.
    ///
    /// Returns `(x, y, w, h)` in pixels, clamped to the frame and never
    /// smaller than 1x1. Returns `None` for an empty region or frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.is_empty() || width == 0 || height == 0 {
            return None;
        }
        let fw = width as f32;
        let fh = height as f32;

        let x0 = (self.x.clamp(0.0, 1.0) * fw).round() as u32;
        let y0 = (self.y.clamp(0.0, 1.0) * fh).round() as u32;
        let x0 = x0.min(width - 1);
        let y0 = y0.min(height - 1);

        let w = ((self.width * fw).round() as u32).clamp(1, width - x0);
        let h = ((self.height * fh).round() as u32).clamp(1, height - y0);
        Some((x0, y0, w, h))
    }
}

impl Default for Roi {
    fn default() -> Self {
        Self::FULL
    }
}

/// Metadata delivered by the capture collaborator alongside the pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub roi: Roi,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Capture timestamp in microseconds.
    pub timestamp_us: u64,
}

impl FrameMetadata {
    pub fn new(pixel_width: u32, pixel_height: u32) -> Self {
        Self {
            roi: Roi::FULL,
            pixel_width,
            pixel_height,
            timestamp_us: 0,
        }
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = roi;
        self
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// A raw frame owned by the exchange queue or by whoever popped it.
///
/// The pixel bytes are copied in at push time, so the producer can reuse
/// its own buffer immediately. The type is move-only; popping transfers
/// ownership to the caller. An invalid frame (`is_valid() == false`) is the
/// empty sentinel and owns no allocation.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    meta: FrameMetadata,
    valid: bool,
    queued_at: Option<Instant>,
}

impl FrameBuffer {
    /// Copy `bytes` into a newly owned frame.
    pub fn copy_from(bytes: &[u8], meta: FrameMetadata) -> Self {
        Self {
            data: bytes.to_vec(),
            meta,
            valid: true,
            queued_at: Some(Instant::now()),
        }
    }

    /// The "nothing available" sentinel: zeroed fields, no buffer.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            meta: FrameMetadata {
                roi: Roi::ZERO,
                pixel_width: 0,
                pixel_height: 0,
                timestamp_us: 0,
            },
            valid: false,
            queued_at: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn roi(&self) -> Roi {
        self.meta.roi
    }

    pub fn pixel_width(&self) -> u32 {
        self.meta.pixel_width
    }

    pub fn pixel_height(&self) -> u32 {
        self.meta.pixel_height
    }

    pub fn timestamp_us(&self) -> u64 {
        self.meta.timestamp_us
    }

    /// Time elapsed since the frame was pushed, if it ever was.
    pub(crate) fn queued_for(&self) -> Option<std::time::Duration> {
        self.queued_at.map(|t| t.elapsed())
    }

    /// Take the pixel bytes out of the frame.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_from_detaches_from_producer_buffer() {
        let mut source = vec![7u8; 16];
        let frame = FrameBuffer::copy_from(&source, FrameMetadata::new(2, 2));
        source.fill(0);

        assert!(frame.is_valid());
        assert_eq!(frame.len(), 16);
        assert!(frame.data().iter().all(|&b| b == 7));
    }

    #[test]
    fn empty_sentinel_has_zeroed_fields() {
        let frame = FrameBuffer::empty();
        assert!(!frame.is_valid());
        assert!(frame.is_empty());
        assert_eq!(frame.roi(), Roi::ZERO);
        assert_eq!(frame.pixel_width(), 0);
        assert_eq!(frame.pixel_height(), 0);
        assert_eq!(frame.timestamp_us(), 0);
        assert!(frame.queued_for().is_none());
    }

    #[test]
    fn full_roi_maps_to_whole_frame() {
        assert_eq!(Roi::FULL.to_pixels(640, 480), Some((0, 0, 640, 480)));
    }

    #[test]
    fn centered_roi_maps_to_inner_rectangle() {
        let roi = Roi::new(0.25, 0.25, 0.5, 0.5);
        assert_eq!(roi.to_pixels(8, 4), Some((2, 1, 4, 2)));
    }

    #[test]
    fn oversized_roi_is_clamped_to_frame() {
        let roi = Roi::new(0.5, 0.5, 2.0, 2.0);
        assert_eq!(roi.to_pixels(10, 10), Some((5, 5, 5, 5)));
    }

    #[test]
    fn tiny_roi_keeps_at_least_one_pixel() {
        let roi = Roi::new(0.0, 0.0, 0.001, 0.001);
        assert_eq!(roi.to_pixels(10, 10), Some((0, 0, 1, 1)));
    }

    #[test]
    fn empty_roi_has_no_pixels() {
        assert!(Roi::ZERO.is_empty());
        assert_eq!(Roi::ZERO.to_pixels(10, 10), None);
        assert_eq!(Roi::FULL.to_pixels(0, 10), None);
    }

    #[test]
    fn frame_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameBuffer>();
    }
}
