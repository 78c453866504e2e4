//! wgpu render backend.
//!
//! Each filter is a compute pipeline over `filters.wgsl`:
//!
//! 1. Bind the input texture, the graph source and the output storage texture
//! 2. Upload the stage uniforms and dispatch 16x16 workgroups
//! 3. Read textures back through a padded staging buffer on demand

use std::collections::HashMap;
use std::sync::mpsc;

use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::render::backend::{
    FilterPass, HandleAllocator, ProgramHandle, RenderBackend, TextureHandle,
};
use crate::render::error::{RenderError, Result};
use crate::render::filters::{FilterKind, FilterUniforms};

const WORKGROUP_SIZE: u32 = 16;

struct GpuTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

impl GpuTexture {
    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    fn copy_info(&self) -> wgpu::TexelCopyTextureInfo<'_> {
        wgpu::TexelCopyTextureInfo {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    textures: HashMap<TextureHandle, GpuTexture>,
    programs: HashMap<ProgramHandle, wgpu::ComputePipeline>,
    handles: HandleAllocator,
}

impl GpuBackend {
    /// Open the default adapter and build the shared filter pipeline layout.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        }))
        .map_err(|e| RenderError::BackendInit(format!("no GPU adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected for filter graph"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("framegraph_device"),
            ..Default::default()
        }))
        .map_err(|e| RenderError::BackendInit(format!("failed to create GPU device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("framegraph_filters"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/filters.wgsl").into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("framegraph_filter_bind_group_layout"),
            entries: &[
                // Previous stage output
                texture_entry(0),
                // Graph source
                texture_entry(1),
                // Stage output
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("framegraph_filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            shader,
            bind_group_layout,
            pipeline_layout,
            textures: HashMap::new(),
            programs: HashMap::new(),
            handles: HandleAllocator::new(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn texture(&self, handle: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&handle)
            .ok_or(RenderError::InvalidTexture(handle))
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Run `create` inside out-of-memory and validation error scopes.
    ///
    /// Without the scopes a failed allocation goes to the device's
    /// uncaptured-error handler, which panics. Out-of-memory becomes
    /// `ResourceExhausted`; anything the device rejects becomes `Backend`.
    fn scoped<T>(&self, what: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        let oom = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let rejected = pollster::block_on(validation.pop());
        let exhausted = pollster::block_on(oom.pop());

        if let Some(e) = exhausted {
            warn!("{what}: GPU allocation failed: {e}");
            return Err(RenderError::ResourceExhausted(format!("{what}: {e}")));
        }
        if let Some(e) = rejected {
            return Err(RenderError::Backend(format!("{what}: {e}")));
        }
        Ok(value)
    }
}

impl RenderBackend for GpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_texture(&mut self, width: u32, height: u32, label: &str) -> Result<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::ResourceExhausted(format!(
                "{label}: {width}x{height} outside 1..={max}"
            )));
        }

        let texture = self.scoped(label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;

        let handle = TextureHandle::from_raw(self.handles.issue());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                width,
                height,
            },
        );
        debug!(?handle, width, height, label, "GPU texture created");
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture) {
            tex.texture.destroy();
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn write_texture(&mut self, texture: TextureHandle, rgba: &[u8]) -> Result<()> {
        let tex = self.texture(texture)?;
        let expected = tex.width as usize * tex.height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::SizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        self.queue.write_texture(
            tex.copy_info(),
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * tex.width),
                rows_per_image: None,
            },
            tex.extent(),
        );
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> Result<Vec<u8>> {
        let tex = self.texture(texture)?;
        let row_bytes = 4 * tex.width;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framegraph_readback"),
            size: padded_row as u64 * tex.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("framegraph_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            tex.copy_info(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: None,
                },
            },
            tex.extent(),
        );
        self.submit(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| RenderError::Backend(format!("device poll failed: {e}")))?;
        rx.recv()
            .map_err(|e| RenderError::Backend(format!("failed to map readback buffer: {e}")))?
            .map_err(|e| RenderError::Backend(format!("readback map error: {e}")))?;

        let mut pixels = Vec::with_capacity(row_bytes as usize * tex.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<()> {
        let s = self.texture(src)?;
        let d = self.texture(dst)?;
        if (s.width, s.height) != (d.width, d.height) {
            return Err(RenderError::TextureSizeMismatch {
                src_size: (s.width, s.height),
                dst_size: (d.width, d.height),
            });
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("framegraph_copy_encoder"),
            });
        encoder.copy_texture_to_texture(s.copy_info(), d.copy_info(), s.extent());
        self.submit(encoder);
        Ok(())
    }

    fn create_program(&mut self, kind: FilterKind) -> Result<ProgramHandle> {
        let pipeline = self.scoped(kind.label(), |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kind.label()),
                layout: Some(&self.pipeline_layout),
                module: &self.shader,
                entry_point: Some(kind.entry_point()),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;
        let handle = ProgramHandle::from_raw(self.handles.issue());
        self.programs.insert(handle, pipeline);
        debug!(?handle, filter = kind.label(), "compute pipeline created");
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn dispatch(&mut self, pass: &FilterPass<'_>) -> Result<()> {
        let pipeline = self
            .programs
            .get(&pass.program)
            .ok_or(RenderError::InvalidProgram(pass.program))?;
        if pass.output == pass.input || pass.output == pass.source {
            return Err(RenderError::Backend(
                "filter output aliases one of its inputs".into(),
            ));
        }
        let input = self.texture(pass.input)?;
        let source = self.texture(pass.source)?;
        let output = self.texture(pass.output)?;
        let params: &FilterUniforms = pass.uniforms;
        if (output.width, output.height) != (params.width, params.height) {
            return Err(RenderError::TextureSizeMismatch {
                src_size: (params.width, params.height),
                dst_size: (output.width, output.height),
            });
        }

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("framegraph_filter_uniforms"),
                contents: bytemuck::bytes_of(params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let view_desc = wgpu::TextureViewDescriptor::default();
        let view = |t: &GpuTexture| t.texture.create_view(&view_desc);
        let (input_view, source_view, output_view) = (view(input), view(source), view(output));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("framegraph_filter_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&output_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("framegraph_filter_encoder"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("framegraph_filter_pass"),
                ..Default::default()
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(
                params.width.div_ceil(WORKGROUP_SIZE),
                params.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.submit(encoder);
        Ok(())
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        for (_, tex) in self.textures.drain() {
            tex.texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::filters::{apply_cpu, FilterStage, PixelView};

    fn backend_or_skip() -> Option<GpuBackend> {
        match GpuBackend::new() {
            Ok(backend) => Some(backend),
            Err(e) => {
                // No adapter on this machine
                println!("Skipping GPU test: {e}");
                None
            }
        }
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 13 % 256) as u8, (y * 29 % 256) as u8, 90, 255]);
            }
        }
        data
    }

    #[test]
    fn readback_handles_row_padding() {
        let Some(mut backend) = backend_or_skip() else {
            return;
        };
        // 4 * 17 bytes per row is not a multiple of the copy alignment.
        let data = gradient(17, 5);
        let tex = backend.create_texture(17, 5, "odd").unwrap();
        backend.write_texture(tex, &data).unwrap();
        assert_eq!(backend.read_texture(tex).unwrap(), data);
    }

    #[test]
    fn oversized_texture_is_resource_exhaustion() {
        let Some(mut backend) = backend_or_skip() else {
            return;
        };
        let max = backend.device.limits().max_texture_dimension_2d;
        assert!(matches!(
            backend.create_texture(max + 1, 1, "huge"),
            Err(RenderError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn rejected_allocation_is_an_error_not_a_panic() {
        let Some(mut backend) = backend_or_skip() else {
            return;
        };
        // A texture with no usage flags is refused by the device.
        let result = backend.scoped("unusable", |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("unusable"),
                size: wgpu::Extent3d {
                    width: 4,
                    height: 4,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::empty(),
                view_formats: &[],
            })
        });
        assert!(matches!(result, Err(RenderError::Backend(_))));

        // The device is still usable afterwards.
        let tex = backend.create_texture(4, 4, "after").unwrap();
        assert_eq!(backend.texture_size(tex), Some((4, 4)));
    }

    #[test]
    fn every_filter_program_builds_in_scope() {
        let Some(mut backend) = backend_or_skip() else {
            return;
        };
        for kind in [
            FilterKind::Brightness,
            FilterKind::EdgeDetection,
            FilterKind::Composite,
        ] {
            let program = backend.create_program(kind).unwrap();
            assert!(!program.is_null());
        }
        assert_eq!(backend.programs.len(), 3);
    }

    #[test]
    fn brightness_matches_cpu_reference() {
        let Some(mut backend) = backend_or_skip() else {
            return;
        };
        let data = gradient(20, 12);
        let input = backend.create_texture(20, 12, "in").unwrap();
        let output = backend.create_texture(20, 12, "out").unwrap();
        backend.write_texture(input, &data).unwrap();
        let program = backend.create_program(FilterKind::Brightness).unwrap();
        let uniforms = FilterStage::brightness(0.25).uniforms(20, 12);

        backend
            .dispatch(&FilterPass {
                program,
                input,
                source: input,
                output,
                uniforms: &uniforms,
            })
            .unwrap();

        let view = PixelView {
            width: 20,
            height: 12,
            data: &data,
        };
        let expected = apply_cpu(FilterKind::Brightness, &uniforms, view, view);
        let actual = backend.read_texture(output).unwrap();
        // Allow one step of rounding difference between float paths.
        assert!(actual
            .iter()
            .zip(&expected)
            .all(|(a, b)| a.abs_diff(*b) <= 1));
    }
}
