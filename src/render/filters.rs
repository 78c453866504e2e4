//! Filter stage definitions and the reference (CPU) filter kernels.
//!
//! Every backend implements the same per-pixel math. Inputs of any size are
//! mapped onto the output grid with nearest-neighbour sampling, so the first
//! stage can read a source texture that differs from the render size.
//! `shaders/filters.wgsl` is the GPU twin of the functions below.

use serde::{Deserialize, Serialize};

/// The filters a graph can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    /// Adds `strength` to every colour channel.
    Brightness,
    /// Sobel edge magnitude of the luminance, scaled by `strength`.
    EdgeDetection,
    /// Blends the previous stage over the graph source by `mix`.
    Composite,
}

impl FilterKind {
    pub fn label(self) -> &'static str {
        match self {
            FilterKind::Brightness => "brightness",
            FilterKind::EdgeDetection => "edge_detection",
            FilterKind::Composite => "composite",
        }
    }

    /// Shader entry point implementing this filter.
    pub fn entry_point(self) -> &'static str {
        match self {
            FilterKind::Brightness => "brightness_main",
            FilterKind::EdgeDetection => "edge_main",
            FilterKind::Composite => "composite_main",
        }
    }

    fn default_strength(self) -> f32 {
        match self {
            FilterKind::Brightness => 0.1,
            FilterKind::EdgeDetection | FilterKind::Composite => 1.0,
        }
    }

    fn default_mix(self) -> f32 {
        match self {
            FilterKind::Composite => 0.5,
            FilterKind::Brightness | FilterKind::EdgeDetection => 1.0,
        }
    }
}

/// One configured stage of the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "StageConfig")]
pub struct FilterStage {
    pub kind: FilterKind,
    pub strength: f32,
    pub mix: f32,
}

/// On-disk form of a stage; omitted parameters take the kind's defaults.
#[derive(Deserialize)]
struct StageConfig {
    kind: FilterKind,
    strength: Option<f32>,
    mix: Option<f32>,
}

impl From<StageConfig> for FilterStage {
    fn from(raw: StageConfig) -> Self {
        let mut stage = FilterStage::new(raw.kind);
        if let Some(strength) = raw.strength {
            stage.strength = strength;
        }
        if let Some(mix) = raw.mix {
            stage.mix = mix;
        }
        stage
    }
}

impl FilterStage {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            strength: kind.default_strength(),
            mix: kind.default_mix(),
        }
    }

    pub fn brightness(strength: f32) -> Self {
        Self::new(FilterKind::Brightness).with_strength(strength)
    }

    pub fn edge_detection(strength: f32) -> Self {
        Self::new(FilterKind::EdgeDetection).with_strength(strength)
    }

    pub fn composite(mix: f32) -> Self {
        Self::new(FilterKind::Composite).with_mix(mix)
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_mix(mut self, mix: f32) -> Self {
        self.mix = mix;
        self
    }

    /// Brightness, then edge detection, then a composite back over the source.
    pub fn default_chain() -> Vec<FilterStage> {
        vec![
            FilterStage::new(FilterKind::Brightness),
            FilterStage::new(FilterKind::EdgeDetection),
            FilterStage::new(FilterKind::Composite),
        ]
    }

    /// Uniform block for rendering this stage at `width` x `height`.
    pub fn uniforms(&self, width: u32, height: u32) -> FilterUniforms {
        FilterUniforms {
            width,
            height,
            strength: self.strength,
            mix_amount: self.mix,
        }
    }
}

/// Per-pass uniform block. Layout matches `Params` in `filters.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FilterUniforms {
    pub width: u32,
    pub height: u32,
    pub strength: f32,
    pub mix_amount: f32,
}

/// Borrowed RGBA8 image.
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl PixelView<'_> {
    /// Nearest-neighbour fetch of output coordinate `(x, y)` on a
    /// `out_w` x `out_h` grid, clamped at the borders. Channels in [0, 1].
    fn sample(&self, x: i64, y: i64, out_w: u32, out_h: u32) -> [f32; 4] {
        let cx = x.clamp(0, out_w as i64 - 1) as u64;
        let cy = y.clamp(0, out_h as i64 - 1) as u64;
        let sx = (cx * self.width as u64 / out_w as u64).min(self.width as u64 - 1);
        let sy = (cy * self.height as u64 / out_h as u64).min(self.height as u64 - 1);
        let idx = ((sy * self.width as u64 + sx) * 4) as usize;
        let px = &self.data[idx..idx + 4];
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ]
    }
}

fn luminance(c: [f32; 4]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

fn to_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Run one filter over `input` (and `source` for compositing) into a newly
/// allocated `uniforms.width` x `uniforms.height` RGBA8 buffer.
pub fn apply_cpu(
    kind: FilterKind,
    uniforms: &FilterUniforms,
    input: PixelView<'_>,
    source: PixelView<'_>,
) -> Vec<u8> {
    let (w, h) = (uniforms.width, uniforms.height);
    let mut out = vec![0u8; w as usize * h as usize * 4];
    if w == 0 || h == 0 || input.width == 0 || input.height == 0 {
        return out;
    }

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let rgba = match kind {
                FilterKind::Brightness => {
                    let c = input.sample(x, y, w, h);
                    let s = uniforms.strength;
                    [c[0] + s, c[1] + s, c[2] + s, c[3]]
                }
                FilterKind::EdgeDetection => {
                    let l = |dx: i64, dy: i64| luminance(input.sample(x + dx, y + dy, w, h));
                    let (tl, tm, tr) = (l(-1, -1), l(0, -1), l(1, -1));
                    let (ml, mr) = (l(-1, 0), l(1, 0));
                    let (bl, bm, br) = (l(-1, 1), l(0, 1), l(1, 1));
                    let gx = -tl - 2.0 * ml - bl + tr + 2.0 * mr + br;
                    let gy = -tl - 2.0 * tm - tr + bl + 2.0 * bm + br;
                    let e = ((gx * gx + gy * gy).sqrt() * uniforms.strength).clamp(0.0, 1.0);
                    [e, e, e, 1.0]
                }
                FilterKind::Composite => {
                    let prev = input.sample(x, y, w, h);
                    let src = source.sample(x, y, w, h);
                    let m = uniforms.mix_amount;
                    [
                        prev[0] * m + src[0] * (1.0 - m),
                        prev[1] * m + src[1] * (1.0 - m),
                        prev[2] * m + src[2] * (1.0 - m),
                        prev[3] * m + src[3] * (1.0 - m),
                    ]
                }
            };
            let idx = ((y * w as i64 + x) * 4) as usize;
            for (dst, v) in out[idx..idx + 4].iter_mut().zip(rgba) {
                *dst = to_unorm(v);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.repeat((width * height) as usize)
    }

    fn view(width: u32, height: u32, data: &[u8]) -> PixelView<'_> {
        PixelView {
            width,
            height,
            data,
        }
    }

    #[test]
    fn default_chain_order() {
        let kinds: Vec<_> = FilterStage::default_chain()
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                FilterKind::Brightness,
                FilterKind::EdgeDetection,
                FilterKind::Composite
            ]
        );
    }

    #[test]
    fn stage_deserialises_with_kind_defaults() {
        let stage: FilterStage = serde_json::from_str(r#"{ "kind": "composite" }"#).unwrap();
        assert_eq!(stage, FilterStage::new(FilterKind::Composite));
        assert_eq!(stage.mix, 0.5);

        let stage: FilterStage =
            serde_json::from_str(r#"{ "kind": "brightness", "strength": 0.3 }"#).unwrap();
        assert_eq!(stage.strength, 0.3);
    }

    #[test]
    fn uniforms_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<FilterUniforms>(), 16);
        let u = FilterStage::brightness(0.2).uniforms(4, 2);
        assert_eq!(bytemuck::bytes_of(&u).len(), 16);
    }

    #[test]
    fn brightness_adds_strength_and_keeps_alpha() {
        let src = solid(2, 2, [100, 0, 250, 77]);
        let stage = FilterStage::brightness(0.2);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(2, 2),
            view(2, 2, &src),
            view(2, 2, &src),
        );
        assert_eq!(&out[..4], &[151, 51, 255, 77]);
    }

    #[test]
    fn negative_brightness_clamps_at_zero() {
        let src = solid(1, 1, [10, 200, 0, 255]);
        let stage = FilterStage::brightness(-0.2);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(1, 1),
            view(1, 1, &src),
            view(1, 1, &src),
        );
        assert_eq!(out, vec![0, 149, 0, 255]);
    }

    #[test]
    fn edge_detection_is_black_on_flat_image() {
        let src = solid(4, 4, [90, 90, 90, 255]);
        let stage = FilterStage::edge_detection(1.0);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(4, 4),
            view(4, 4, &src),
            view(4, 4, &src),
        );
        assert!(out.chunks(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn edge_detection_highlights_vertical_step() {
        // Left half black, right half white.
        let mut src = Vec::new();
        for _y in 0..4 {
            for x in 0..4 {
                let v = if x < 2 { 0 } else { 255 };
                src.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let stage = FilterStage::edge_detection(1.0);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(4, 4),
            view(4, 4, &src),
            view(4, 4, &src),
        );
        let at = |x: usize, y: usize| out[(y * 4 + x) * 4];
        assert_eq!(at(1, 1), 255);
        assert_eq!(at(2, 1), 255);
        assert_eq!(at(0, 1), 0);
        assert_eq!(at(3, 1), 0);
    }

    #[test]
    fn composite_blends_previous_over_source() {
        let prev = solid(1, 1, [200, 0, 100, 255]);
        let src = solid(1, 1, [0, 200, 100, 255]);
        let stage = FilterStage::composite(0.25);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(1, 1),
            view(1, 1, &prev),
            view(1, 1, &src),
        );
        assert_eq!(out, vec![50, 150, 100, 255]);
    }

    #[test]
    fn input_is_scaled_to_output_grid() {
        // 2x1 input (red, blue) upscaled to 4x2.
        let src = [255, 0, 0, 255, 0, 0, 255, 255];
        let stage = FilterStage::brightness(0.0);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(4, 2),
            view(2, 1, &src),
            view(2, 1, &src),
        );
        assert_eq!(out.len(), 4 * 2 * 4);
        let at = |x: usize, y: usize| &out[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(0, 0), &[255, 0, 0, 255]);
        assert_eq!(at(1, 1), &[255, 0, 0, 255]);
        assert_eq!(at(2, 0), &[0, 0, 255, 255]);
        assert_eq!(at(3, 1), &[0, 0, 255, 255]);
    }

    #[test]
    fn zero_sized_output_is_empty() {
        let src = solid(1, 1, [1, 2, 3, 4]);
        let stage = FilterStage::brightness(0.0);
        let out = apply_cpu(
            stage.kind,
            &stage.uniforms(0, 0),
            view(1, 1, &src),
            view(1, 1, &src),
        );
        assert!(out.is_empty());
    }
}
