use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::render::error::{RenderError, Result};
use crate::render::filters::{FilterKind, FilterUniforms};

/// Opaque texture handle issued by a [`RenderBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// The invalid handle. No backend ever issues it.
    pub const NULL: TextureHandle = TextureHandle(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque filter program handle issued by a [`RenderBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(u64);

impl ProgramHandle {
    pub const NULL: ProgramHandle = ProgramHandle(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Monotonic handle allocator shared by the backends. Never yields 0.
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn issue(&mut self) -> u64 {
        let raw = self.next;
        self.next += 1;
        raw
    }
}

/// One filter pass: bind `program`, read `input` (and the graph `source`
/// for compositing stages), write `output`.
#[derive(Debug, Clone, Copy)]
pub struct FilterPass<'a> {
    pub program: ProgramHandle,
    pub input: TextureHandle,
    pub source: TextureHandle,
    pub output: TextureHandle,
    pub uniforms: &'a FilterUniforms,
}

/// Rendering capability set the filter graph is written against.
///
/// Every texture is RGBA8. Implementations own the rendering context, so a
/// backend is `Send` (it can be moved to the render thread) but not `Sync`:
/// all calls happen on the thread that currently owns it.
pub trait RenderBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Allocate a `width` x `height` RGBA8 texture.
    fn create_texture(&mut self, width: u32, height: u32, label: &str) -> Result<TextureHandle>;

    /// Free a texture. Unknown handles are ignored.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Dimensions of a live texture.
    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    /// Replace the full contents of a texture with tightly packed RGBA8.
    fn write_texture(&mut self, texture: TextureHandle, rgba: &[u8]) -> Result<()>;

    /// Read a texture back as tightly packed RGBA8.
    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>>;

    /// Copy `src` into `dst`; both must have the same size.
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()>;

    /// Compile the program implementing `kind`.
    fn create_program(&mut self, kind: FilterKind) -> Result<ProgramHandle>;

    /// Free a program. Unknown handles are ignored.
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Run one filter pass.
    fn dispatch(&mut self, pass: &FilterPass<'_>) -> Result<()>;
}

/// Which backend to create at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Try the GPU, fall back to software.
    #[default]
    Auto,
    Gpu,
    Software,
}

impl BackendKind {
    /// Environment variable overriding the configured backend.
    pub const ENV_VAR: &'static str = "FRAMEGRAPH_BACKEND";

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "gpu" | "wgpu" => Some(Self::Gpu),
            "software" | "cpu" => Some(Self::Software),
            _ => None,
        }
    }

    /// Apply the `FRAMEGRAPH_BACKEND` override, if set to a known value.
    pub fn with_env_override(self) -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                warn!("Ignoring unknown {}={value}", Self::ENV_VAR);
                self
            }),
            Err(_) => self,
        }
    }
}

/// Create the render backend for `kind`.
///
/// `Auto` prefers the GPU and falls back to the software renderer when no
/// adapter is available.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn RenderBackend>> {
    let backend: Box<dyn RenderBackend> = match kind {
        BackendKind::Software => Box::new(super::software::SoftwareBackend::new()),
        BackendKind::Gpu => Box::new(super::gpu::GpuBackend::new()?),
        BackendKind::Auto => match super::gpu::GpuBackend::new() {
            Ok(gpu) => Box::new(gpu),
            Err(e) => {
                warn!("GPU backend unavailable, using software renderer: {e}");
                Box::new(super::software::SoftwareBackend::new())
            }
        },
    };
    info!("render backend: {}", backend.name());
    Ok(backend)
}

/// Fail with [`RenderError::InvalidTexture`] unless `texture` is live.
pub(crate) fn require_size(
    backend: &dyn RenderBackend,
    texture: TextureHandle,
) -> Result<(u32, u32)> {
    backend
        .texture_size(texture)
        .ok_or(RenderError::InvalidTexture(texture))
}
