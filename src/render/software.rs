//! CPU render backend.
//!
//! Always available. Used when no GPU adapter can be opened and by the test
//! suite. An optional texture budget makes allocation failures reproducible.

use std::collections::HashMap;

use tracing::debug;

use crate::render::backend::{
    FilterPass, HandleAllocator, ProgramHandle, RenderBackend, TextureHandle,
};
use crate::render::error::{RenderError, Result};
use crate::render::filters::{apply_cpu, FilterKind, PixelView};

struct CpuTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CpuTexture {
    fn view(&self) -> PixelView<'_> {
        PixelView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

pub struct SoftwareBackend {
    textures: HashMap<TextureHandle, CpuTexture>,
    programs: HashMap<ProgramHandle, FilterKind>,
    handles: HandleAllocator,
    texture_budget: Option<usize>,
    program_budget: Option<usize>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            programs: HashMap::new(),
            handles: HandleAllocator::new(),
            texture_budget: None,
            program_budget: None,
        }
    }

    /// Refuse to hold more than `max` live textures at once.
    pub fn with_texture_budget(max: usize) -> Self {
        Self {
            texture_budget: Some(max),
            ..Self::new()
        }
    }

    pub fn set_texture_budget(&mut self, max: Option<usize>) {
        self.texture_budget = max;
    }

    /// Refuse to hold more than `max` live programs at once.
    pub fn with_program_budget(max: usize) -> Self {
        Self {
            program_budget: Some(max),
            ..Self::new()
        }
    }

    pub fn set_program_budget(&mut self, max: Option<usize>) {
        self.program_budget = max;
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn texture(&self, handle: TextureHandle) -> Result<&CpuTexture> {
        self.textures
            .get(&handle)
            .ok_or(RenderError::InvalidTexture(handle))
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_texture(&mut self, width: u32, height: u32, label: &str) -> Result<TextureHandle> {
        if width == 0 || height == 0 {
            return Err(RenderError::ResourceExhausted(format!(
                "{label}: zero-sized texture {width}x{height}"
            )));
        }
        if let Some(max) = self.texture_budget {
            if self.textures.len() >= max {
                return Err(RenderError::ResourceExhausted(format!(
                    "{label}: texture budget of {max} reached"
                )));
            }
        }
        let handle = TextureHandle::from_raw(self.handles.issue());
        self.textures.insert(
            handle,
            CpuTexture {
                width,
                height,
                data: vec![0; width as usize * height as usize * 4],
            },
        );
        debug!(?handle, width, height, label, "texture created");
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn write_texture(&mut self, texture: TextureHandle, rgba: &[u8]) -> Result<()> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or(RenderError::InvalidTexture(texture))?;
        if rgba.len() != tex.data.len() {
            return Err(RenderError::SizeMismatch {
                expected: tex.data.len(),
                actual: rgba.len(),
            });
        }
        tex.data.copy_from_slice(rgba);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>> {
        Ok(self.texture(texture)?.data.clone())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()> {
        let (src_size, data) = {
            let s = self.texture(src)?;
            ((s.width, s.height), s.data.clone())
        };
        let d = self
            .textures
            .get_mut(&dst)
            .ok_or(RenderError::InvalidTexture(dst))?;
        if (d.width, d.height) != src_size {
            return Err(RenderError::TextureSizeMismatch {
                src_size,
                dst_size: (d.width, d.height),
            });
        }
        d.data = data;
        Ok(())
    }

    fn create_program(&mut self, kind: FilterKind) -> Result<ProgramHandle> {
        if let Some(max) = self.program_budget {
            if self.programs.len() >= max {
                return Err(RenderError::ResourceExhausted(format!(
                    "{}: program budget of {max} reached",
                    kind.label()
                )));
            }
        }
        let handle = ProgramHandle::from_raw(self.handles.issue());
        self.programs.insert(handle, kind);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn dispatch(&mut self, pass: &FilterPass<'_>) -> Result<()> {
        let kind = *self
            .programs
            .get(&pass.program)
            .ok_or(RenderError::InvalidProgram(pass.program))?;
        if pass.output == pass.input || pass.output == pass.source {
            return Err(RenderError::Backend(
                "filter output aliases one of its inputs".into(),
            ));
        }
        let out_size = self
            .texture_size(pass.output)
            .ok_or(RenderError::InvalidTexture(pass.output))?;
        if out_size != (pass.uniforms.width, pass.uniforms.height) {
            return Err(RenderError::TextureSizeMismatch {
                src_size: (pass.uniforms.width, pass.uniforms.height),
                dst_size: out_size,
            });
        }

        let pixels = apply_cpu(
            kind,
            pass.uniforms,
            self.texture(pass.input)?.view(),
            self.texture(pass.source)?.view(),
        );
        if let Some(out) = self.textures.get_mut(&pass.output) {
            out.data = pixels;
        }
        Ok(())
    }
}
