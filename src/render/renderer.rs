use std::sync::{Arc, Weak};

use tracing::{debug, info, trace, warn};

use crate::exchange::{FrameBuffer, Roi};
use crate::render::backend::{create_backend, require_size, RenderBackend, TextureHandle};
use crate::render::error::{RenderError, Result};
use crate::render::filters::FilterStage;
use crate::render::graph::FilterGraph;
use crate::render::target::{DisplayTarget, ExportReader, PresentedFrame, TerminalSource};
use crate::settings::RendererSettings;

/// Runs a filter graph over camera frames on the thread that owns the
/// render backend.
///
/// Lifecycle: `new` -> [`load_graph`](Self::load_graph) -> any number of
/// renders -> [`release`](Self::release). Rendering before the graph is
/// loaded fails with [`RenderError::NotReady`].
///
/// The render size is chosen per call: the bound display surface wins, then
/// an explicit [`set_output_size`](Self::set_output_size), then the size of
/// the input texture.
pub struct FilterGraphRenderer {
    backend: Box<dyn RenderBackend>,
    graph: FilterGraph,
    /// Renderer-owned source for CPU-side pixels.
    canvas: TextureHandle,
    /// Private copy of the terminal output read by the export path.
    export_texture: TextureHandle,
    export: ExportReader,
    display: Option<Weak<dyn DisplayTarget>>,
    output_size: Option<(u32, u32)>,
}

impl FilterGraphRenderer {
    pub fn new(backend: Box<dyn RenderBackend>, stages: Vec<FilterStage>) -> Result<Self> {
        Ok(Self {
            backend,
            graph: FilterGraph::new(stages)?,
            canvas: TextureHandle::NULL,
            export_texture: TextureHandle::NULL,
            export: ExportReader::new(),
            display: None,
            output_size: None,
        })
    }

    /// Create the configured backend (honouring `FRAMEGRAPH_BACKEND`) and an
    /// unloaded renderer for the configured chain.
    pub fn from_settings(settings: &RendererSettings) -> Result<Self> {
        let backend = create_backend(settings.backend.with_env_override())?;
        let mut renderer = Self::new(backend, settings.chain.clone())?;
        renderer.output_size = settings.output_size;
        Ok(renderer)
    }

    /// Allocate the programs for every stage. Framebuffers follow on the
    /// first render, once the size is known.
    pub fn load_graph(&mut self) -> Result<()> {
        if self.graph.is_built() {
            warn!("load_graph called on a loaded graph; ignoring");
            return Ok(());
        }
        self.graph.build(self.backend.as_mut())?;
        info!(
            backend = self.backend.name(),
            stages = self.graph.stages().len(),
            "filter graph loaded"
        );
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.graph.is_built()
    }

    /// Free every backend resource and drop the display binding.
    /// No-op when nothing is loaded.
    pub fn release(&mut self) {
        let was_loaded = self.graph.is_built();
        self.graph.release(self.backend.as_mut());
        for texture in [
            std::mem::replace(&mut self.canvas, TextureHandle::NULL),
            std::mem::replace(&mut self.export_texture, TextureHandle::NULL),
        ] {
            if !texture.is_null() {
                self.backend.destroy_texture(texture);
            }
        }
        self.display = None;
        if was_loaded {
            debug!("filter graph released");
        }
    }

    /// Run the chain over `input` and return the terminal output texture.
    ///
    /// The output stays owned by the graph and is overwritten by the next
    /// render. With `export` set, the result is also copied to a private
    /// texture and read back into the [`ExportReader`].
    pub fn render(&mut self, input: TextureHandle, export: bool) -> Result<TextureHandle> {
        self.render_timed(input, export, 0)
    }

    /// Upload `width` x `height` RGBA8 pixels, crop them to `roi` and render.
    pub fn set_canvas_pixels(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        frame_time_us: u64,
        roi: Roi,
    ) -> Result<TextureHandle> {
        self.draw_canvas(width, height, pixels, frame_time_us, roi, false)
    }

    /// Render a frame popped from the exchange, using its ROI and timestamp.
    pub fn render_frame(&mut self, frame: &FrameBuffer, export: bool) -> Result<TextureHandle> {
        if !frame.is_valid() {
            return Err(RenderError::EmptyFrame);
        }
        let meta = frame.metadata();
        self.draw_canvas(
            meta.pixel_width,
            meta.pixel_height,
            frame.data(),
            meta.timestamp_us,
            meta.roi,
            export,
        )
    }

    /// Render at `width` x `height` when no display surface is bound.
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.output_size = Some((width, height));
    }

    /// Go back to rendering at the input size.
    pub fn clear_output_size(&mut self) {
        self.output_size = None;
    }

    /// Explicit off-screen size, if one is set.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.output_size
    }

    /// Size of the current framebuffers, `None` before the first render.
    pub fn render_size(&self) -> Option<(u32, u32)> {
        self.graph.size()
    }

    /// Bind a display surface; subsequent renders present into it.
    pub fn set_display_view(&mut self, target: &Arc<dyn DisplayTarget>) {
        self.display = Some(Arc::downgrade(target));
    }

    pub fn remove_render_target(&mut self) {
        self.display = None;
    }

    pub fn has_display(&self) -> bool {
        self.display
            .as_ref()
            .is_some_and(|target| target.strong_count() > 0)
    }

    /// The terminal node and its current framebuffer, once sized.
    pub fn terminal_source(&self) -> Option<TerminalSource> {
        let node = self.graph.terminal()?;
        let (width, height) = self.graph.size()?;
        Some(TerminalSource {
            kind: node.stage().kind,
            texture: node.framebuffer(),
            width,
            height,
        })
    }

    /// Reader for exported frames; clones may be sent to other threads.
    pub fn export_reader(&self) -> ExportReader {
        self.export.clone()
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    /// Direct access for uploading input textures.
    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    fn draw_canvas(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        frame_time_us: u64,
        roi: Roi,
        export: bool,
    ) -> Result<TextureHandle> {
        if !self.is_loaded() {
            return Err(RenderError::NotReady);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RenderError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let (x, y, w, h) = roi.to_pixels(width, height).ok_or(RenderError::EmptyRoi)?;

        let cropped = crop_rgba(pixels, width, (x, y, w, h));
        ensure_texture(self.backend.as_mut(), &mut self.canvas, w, h, "canvas")?;
        self.backend.write_texture(self.canvas, &cropped)?;
        self.render_timed(self.canvas, export, frame_time_us)
    }

    fn render_timed(
        &mut self,
        input: TextureHandle,
        export: bool,
        frame_time_us: u64,
    ) -> Result<TextureHandle> {
        if !self.is_loaded() {
            return Err(RenderError::NotReady);
        }
        let input_size = require_size(self.backend.as_ref(), input)?;
        let display = self.display_target();
        let (width, height) = display
            .as_ref()
            .and_then(|target| target.surface_size())
            .filter(|&(w, h)| w > 0 && h > 0)
            .or(self.output_size)
            .unwrap_or(input_size);

        self.graph.resize(self.backend.as_mut(), width, height)?;
        let output = self.graph.run(self.backend.as_mut(), input)?;

        if let Some(target) = display {
            let pixels = self.backend.read_texture(output)?;
            target.present(&PresentedFrame {
                pixels: &pixels,
                width,
                height,
                frame_time_us,
            });
        }
        if export {
            self.export_output(output, width, height, frame_time_us)?;
        }
        trace!(?output, width, height, export, "frame rendered");
        Ok(output)
    }

    fn export_output(
        &mut self,
        output: TextureHandle,
        width: u32,
        height: u32,
        frame_time_us: u64,
    ) -> Result<()> {
        ensure_texture(
            self.backend.as_mut(),
            &mut self.export_texture,
            width,
            height,
            "export",
        )?;
        self.backend.copy_texture(output, self.export_texture)?;
        let pixels = self.backend.read_texture(self.export_texture)?;
        self.export.publish(pixels, width, height, frame_time_us);
        Ok(())
    }

    /// Upgrade the display binding, dropping it if the surface has gone.
    fn display_target(&mut self) -> Option<Arc<dyn DisplayTarget>> {
        let target = self.display.as_ref()?.upgrade();
        if target.is_none() {
            debug!("display target dropped; rendering off-screen");
            self.display = None;
        }
        target
    }
}

impl Drop for FilterGraphRenderer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reallocate `slot` unless it is already `width` x `height`. The old
/// texture is kept if the new one cannot be created.
fn ensure_texture(
    backend: &mut dyn RenderBackend,
    slot: &mut TextureHandle,
    width: u32,
    height: u32,
    label: &str,
) -> Result<()> {
    if backend.texture_size(*slot) == Some((width, height)) {
        return Ok(());
    }
    let fresh = backend.create_texture(width, height, label)?;
    let old = std::mem::replace(slot, fresh);
    if !old.is_null() {
        backend.destroy_texture(old);
    }
    Ok(())
}

/// Copy the `(x, y, w, h)` rectangle out of a tightly packed RGBA8 image.
fn crop_rgba(pixels: &[u8], width: u32, (x, y, w, h): (u32, u32, u32, u32)) -> Vec<u8> {
    let stride = width as usize * 4;
    if x == 0 && w == width {
        let start = y as usize * stride;
        return pixels[start..start + h as usize * stride].to_vec();
    }
    let row_bytes = w as usize * 4;
    let mut out = Vec::with_capacity(row_bytes * h as usize);
    for row in y as usize..(y + h) as usize {
        let start = row * stride + x as usize * 4;
        out.extend_from_slice(&pixels[start..start + row_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FrameMetadata;
    use crate::render::backend::BackendKind;
    use crate::render::filters::FilterKind;
    use crate::render::software::SoftwareBackend;
    use parking_lot::Mutex;

    fn passthrough() -> Vec<FilterStage> {
        vec![FilterStage::brightness(0.0)]
    }

    fn loaded(stages: Vec<FilterStage>) -> FilterGraphRenderer {
        let mut renderer =
            FilterGraphRenderer::new(Box::new(SoftwareBackend::new()), stages).unwrap();
        renderer.load_graph().unwrap();
        renderer
    }

    fn upload(
        renderer: &mut FilterGraphRenderer,
        width: u32,
        height: u32,
        rgba: [u8; 4],
    ) -> TextureHandle {
        let backend = renderer.backend_mut();
        let tex = backend.create_texture(width, height, "input").unwrap();
        backend
            .write_texture(tex, &rgba.repeat((width * height) as usize))
            .unwrap();
        tex
    }

    /// 4x4 image where every pixel encodes its own coordinates.
    fn coordinate_image() -> Vec<u8> {
        let mut data = Vec::new();
        for y in 0..4u8 {
            for x in 0..4u8 {
                data.extend_from_slice(&[x * 10, y * 10, 0, 255]);
            }
        }
        data
    }

    #[derive(Default)]
    struct TestDisplay {
        size: Mutex<Option<(u32, u32)>>,
        presented: Mutex<Vec<(u32, u32, usize)>>,
    }

    impl DisplayTarget for TestDisplay {
        fn surface_size(&self) -> Option<(u32, u32)> {
            *self.size.lock()
        }

        fn present(&self, frame: &PresentedFrame<'_>) {
            self.presented
                .lock()
                .push((frame.width, frame.height, frame.pixels.len()));
        }
    }

    #[test]
    fn render_before_load_is_not_ready() {
        let mut renderer = FilterGraphRenderer::new(
            Box::new(SoftwareBackend::new()),
            FilterStage::default_chain(),
        )
        .unwrap();
        let input = upload(&mut renderer, 2, 2, [1, 2, 3, 255]);

        assert!(matches!(
            renderer.render(input, false),
            Err(RenderError::NotReady)
        ));
        assert!(renderer.terminal_source().is_none());
        assert!(renderer.render_size().is_none());
    }

    #[test]
    fn empty_chain_cannot_be_constructed() {
        let result = FilterGraphRenderer::new(Box::new(SoftwareBackend::new()), Vec::new());
        assert!(matches!(result, Err(RenderError::EmptyChain)));
    }

    #[test]
    fn render_returns_terminal_output_at_input_size() {
        let mut renderer = loaded(FilterStage::default_chain());
        let input = upload(&mut renderer, 6, 4, [120, 60, 30, 255]);

        let output = renderer.render(input, false).unwrap();
        assert!(!output.is_null());
        assert_eq!(renderer.backend().texture_size(output), Some((6, 4)));

        let terminal = renderer.terminal_source().unwrap();
        assert_eq!(terminal.texture, output);
        assert_eq!(terminal.kind, FilterKind::Composite);
        assert_eq!((terminal.width, terminal.height), (6, 4));
    }

    #[test]
    fn resize_between_renders_uses_new_size_immediately() {
        let mut renderer = loaded(passthrough());
        let input = upload(&mut renderer, 1920, 1080, [10, 20, 30, 255]);

        let first = renderer.render(input, false).unwrap();
        assert_eq!(renderer.backend().texture_size(first), Some((1920, 1080)));

        renderer.set_output_size(1280, 720);
        let second = renderer.render(input, false).unwrap();
        assert_eq!(renderer.backend().texture_size(second), Some((1280, 720)));
        assert_eq!(renderer.render_size(), Some((1280, 720)));
        // The previous generation is gone.
        assert!(renderer.backend().texture_size(first).is_none());
    }

    #[test]
    fn failed_resize_keeps_previous_framebuffers() {
        // Input plus three framebuffers fit; a second generation does not.
        let backend = SoftwareBackend::with_texture_budget(5);
        let mut renderer =
            FilterGraphRenderer::new(Box::new(backend), FilterStage::default_chain()).unwrap();
        renderer.load_graph().unwrap();
        let input = upload(&mut renderer, 8, 8, [50, 50, 50, 255]);

        let output = renderer.render(input, false).unwrap();
        renderer.set_output_size(16, 16);
        assert!(matches!(
            renderer.render(input, false),
            Err(RenderError::ResourceExhausted(_))
        ));

        let terminal = renderer.terminal_source().unwrap();
        assert_eq!(terminal.texture, output);
        assert_eq!((terminal.width, terminal.height), (8, 8));

        renderer.clear_output_size();
        assert_eq!(renderer.render(input, false).unwrap(), output);
    }

    #[test]
    fn unknown_input_texture_is_rejected() {
        let mut renderer = loaded(passthrough());
        assert!(matches!(
            renderer.render(TextureHandle::NULL, false),
            Err(RenderError::InvalidTexture(_))
        ));
    }

    #[test]
    fn failed_load_leaves_renderer_unloaded() {
        let backend = SoftwareBackend::with_program_budget(2);
        let mut renderer =
            FilterGraphRenderer::new(Box::new(backend), FilterStage::default_chain()).unwrap();

        assert!(matches!(
            renderer.load_graph(),
            Err(RenderError::ResourceExhausted(_))
        ));
        assert!(!renderer.is_loaded());
        assert!(renderer.terminal_source().is_none());

        let input = upload(&mut renderer, 2, 2, [9, 9, 9, 255]);
        assert!(matches!(
            renderer.render(input, false),
            Err(RenderError::NotReady)
        ));
        assert!(matches!(
            renderer.set_canvas_pixels(2, 2, &[9; 16], 0, Roi::FULL),
            Err(RenderError::NotReady)
        ));

        // Both program slots were handed back by the rollback.
        let backend = renderer.backend_mut();
        backend.create_program(FilterKind::Brightness).unwrap();
        backend.create_program(FilterKind::EdgeDetection).unwrap();
        assert!(backend.create_program(FilterKind::Composite).is_err());
    }

    #[test]
    fn load_graph_twice_is_a_no_op() {
        let mut renderer = loaded(FilterStage::default_chain());
        renderer.load_graph().unwrap();
        assert!(renderer.is_loaded());
    }

    #[test]
    fn release_is_idempotent_and_allows_reload() {
        let mut renderer = loaded(FilterStage::default_chain());
        let input = upload(&mut renderer, 2, 2, [0, 0, 0, 255]);
        renderer.render(input, true).unwrap();

        renderer.release();
        renderer.release();
        assert!(!renderer.is_loaded());
        assert!(matches!(
            renderer.render(input, false),
            Err(RenderError::NotReady)
        ));

        renderer.load_graph().unwrap();
        assert!(renderer.render(input, false).is_ok());
    }

    #[test]
    fn display_surface_size_wins_and_receives_frames() {
        let mut renderer = loaded(passthrough());
        let input = upload(&mut renderer, 8, 8, [1, 1, 1, 255]);
        let display = Arc::new(TestDisplay::default());
        *display.size.lock() = Some((4, 2));
        let target: Arc<dyn DisplayTarget> = display.clone();

        renderer.set_output_size(6, 6);
        renderer.set_display_view(&target);
        assert!(renderer.has_display());
        renderer.render(input, false).unwrap();

        assert_eq!(renderer.render_size(), Some((4, 2)));
        assert_eq!(*display.presented.lock(), vec![(4, 2, 32)]);
    }

    #[test]
    fn removed_or_dropped_display_is_not_presented() {
        let mut renderer = loaded(passthrough());
        let input = upload(&mut renderer, 2, 2, [1, 1, 1, 255]);
        let display = Arc::new(TestDisplay::default());
        let target: Arc<dyn DisplayTarget> = display.clone();

        renderer.set_display_view(&target);
        renderer.remove_render_target();
        renderer.render(input, false).unwrap();
        assert!(display.presented.lock().is_empty());

        renderer.set_display_view(&target);
        drop(target);
        drop(display);
        assert!(!renderer.has_display());
        renderer.render(input, false).unwrap();
        assert_eq!(renderer.render_size(), Some((2, 2)));
    }

    #[test]
    fn export_publishes_a_copy_of_the_output() {
        let mut renderer = loaded(FilterStage::default_chain());
        let reader = renderer.export_reader();
        let input = upload(&mut renderer, 3, 3, [200, 100, 50, 255]);

        let output = renderer.render(input, false).unwrap();
        assert!(reader.latest().is_none());

        renderer.render(input, true).unwrap();
        let exported = reader.take().unwrap();
        let rendered = renderer.backend_mut().read_texture(output).unwrap();
        assert_eq!(exported.pixels, rendered);
        assert_eq!((exported.width, exported.height), (3, 3));
        assert_eq!(exported.sequence, 1);
    }

    #[test]
    fn canvas_pixels_are_cropped_to_roi() {
        let mut renderer = loaded(passthrough());
        let image = coordinate_image();

        let output = renderer
            .set_canvas_pixels(4, 4, &image, 7, Roi::new(0.5, 0.5, 0.5, 0.5))
            .unwrap();
        assert_eq!(renderer.backend().texture_size(output), Some((2, 2)));
        let pixels = renderer.backend_mut().read_texture(output).unwrap();
        assert_eq!(&pixels[..4], &[20, 20, 0, 255]);
        assert_eq!(&pixels[12..], &[30, 30, 0, 255]);
    }

    #[test]
    fn canvas_rejects_bad_input() {
        let mut renderer = loaded(passthrough());
        assert!(matches!(
            renderer.set_canvas_pixels(2, 2, &[0; 15], 0, Roi::FULL),
            Err(RenderError::SizeMismatch { .. })
        ));
        assert!(matches!(
            renderer.set_canvas_pixels(2, 2, &[0; 16], 0, Roi::ZERO),
            Err(RenderError::EmptyRoi)
        ));
    }

    #[test]
    fn render_frame_carries_timestamp_into_export() {
        let mut renderer = loaded(passthrough());
        let reader = renderer.export_reader();
        let meta = FrameMetadata::new(4, 4).with_timestamp(1234);
        let frame = FrameBuffer::copy_from(&coordinate_image(), meta);

        renderer.render_frame(&frame, true).unwrap();
        let exported = reader.latest().unwrap();
        assert_eq!(exported.frame_time_us, 1234);
        assert_eq!((exported.width, exported.height), (4, 4));

        assert!(matches!(
            renderer.render_frame(&FrameBuffer::empty(), false),
            Err(RenderError::EmptyFrame)
        ));
    }

    #[test]
    fn from_settings_applies_output_size() {
        let settings = RendererSettings {
            backend: BackendKind::Software,
            chain: passthrough(),
            output_size: Some((5, 3)),
        };
        let mut renderer = FilterGraphRenderer::from_settings(&settings).unwrap();
        assert_eq!(renderer.output_size(), Some((5, 3)));

        renderer.load_graph().unwrap();
        let input = upload(&mut renderer, 2, 2, [9, 9, 9, 255]);
        let output = renderer.render(input, false).unwrap();
        assert_eq!(renderer.backend().texture_size(output), Some((5, 3)));
    }

    #[test]
    fn crop_full_width_rows() {
        let image = coordinate_image();
        let rows = crop_rgba(&image, 4, (0, 1, 4, 2));
        assert_eq!(rows.len(), 4 * 2 * 4);
        assert_eq!(&rows[..4], &[0, 10, 0, 255]);
    }

    #[test]
    fn renderer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FilterGraphRenderer>();
    }
}
