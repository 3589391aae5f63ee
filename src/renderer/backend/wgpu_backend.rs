//! Headless wgpu backend.
//!
//! Every surface, the visible one included, is an `Rgba32Float` texture so that
//! intermediate colors survive between passes without quantisation. Each draw
//! is its own submission; the queue preserves submission order.

use std::collections::{BTreeMap, HashMap};

use wgpu::util::DeviceExt as _;

use crate::color::Rgba;
use crate::error::{CompositingError, CompositingResult};
use crate::renderer::types::{
    BufferHandle, PrimitiveKind, ProgramHandle, ProgramSource, RenderTarget, ResourceCounts,
    SurfaceHandle,
};
use crate::renderer::validation::validate_wgsl;
use crate::renderer::wgsl::{FRAGMENT_ENTRY, VERTEX_ENTRY};

use super::{GpuBackend, PixelBuffer};

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const BYTES_PER_TEXEL: u32 = 16;

struct GpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct GpuProgram {
    label: String,
    strip: wgpu::RenderPipeline,
    list: wgpu::RenderPipeline,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    slots: Vec<u32>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    vertex_count: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    screen: GpuSurface,
    /// Bound in place of declared-but-unbound slots; wgpu zero-initialises it.
    fallback: GpuSurface,
    programs: HashMap<ProgramHandle, GpuProgram>,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    surfaces: HashMap<SurfaceHandle, GpuSurface>,
    texture_slots: BTreeMap<u32, SurfaceHandle>,
    next_id: u32,
}

impl WgpuBackend {
    pub fn new(width: u32, height: u32) -> CompositingResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                CompositingError::backend("no gpu adapter available")
            }
            other => CompositingError::backend(format!("wgpu request_adapter failed: {other:?}")),
        })?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("compositor.device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| CompositingError::backend(format!("wgpu request_device failed: {e:?}")))?;
        tracing::info!(adapter = %adapter_name, width, height, "wgpu backend ready");

        let screen = create_surface(&device, "compositor.screen", width, height)?;
        let fallback = create_surface(&device, "compositor.fallback", 1, 1)?;
        Ok(Self {
            device,
            queue,
            adapter_name,
            screen,
            fallback,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            surfaces: HashMap::new(),
            texture_slots: BTreeMap::new(),
            next_id: 1,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target_surface(&self, target: RenderTarget) -> CompositingResult<&GpuSurface> {
        match target {
            RenderTarget::Screen => Ok(&self.screen),
            RenderTarget::Surface(handle) => self
                .surfaces
                .get(&handle)
                .ok_or_else(|| CompositingError::backend(format!("unknown surface {handle:?}"))),
        }
    }

    fn create_pipeline(
        &self,
        source: &ProgramSource,
        vertex: &wgpu::ShaderModule,
        fragment: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        topology: wgpu::PrimitiveTopology,
    ) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&source.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: Some(VERTEX_ENTRY),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: 8,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: Some(FRAGMENT_ENTRY),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SURFACE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }
}

fn create_surface(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
) -> CompositingResult<GpuSurface> {
    if width == 0 || height == 0 {
        return Err(CompositingError::backend(format!(
            "surface size must be non-zero, got {width}x{height}"
        )));
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuSurface {
        texture,
        view,
        width,
        height,
    })
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn screen_size(&self) -> [u32; 2] {
        [self.screen.width, self.screen.height]
    }

    fn resize_screen(&mut self, width: u32, height: u32) -> CompositingResult<()> {
        self.screen = create_surface(&self.device, "compositor.screen", width, height)?;
        Ok(())
    }

    fn compile_program(&mut self, source: &ProgramSource) -> CompositingResult<ProgramHandle> {
        // naga gives readable diagnostics; the device error scope catches whatever
        // the backend still rejects.
        validate_wgsl(&source.vertex, &format!("{} (vertex stage)", source.label))?;
        validate_wgsl(&source.fragment, &format!("{} (fragment stage)", source.label))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.label),
                source: wgpu::ShaderSource::Wgsl(source.vertex.as_str().into()),
            });
        let fragment = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.label),
                source: wgpu::ShaderSource::Wgsl(source.fragment.as_str().into()),
            });

        let slots: Vec<u32> = source.program.declared_slots().collect();
        let bind_group_layout = (!slots.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
                .iter()
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: *slot,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("compositor.textures.bgl"),
                    entries: &entries,
                })
        });
        let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layout.iter().collect();
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&source.label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });
        let strip = self.create_pipeline(
            source,
            &vertex,
            &fragment,
            &layout,
            wgpu::PrimitiveTopology::TriangleStrip,
        );
        let list = self.create_pipeline(
            source,
            &vertex,
            &fragment,
            &layout,
            wgpu::PrimitiveTopology::TriangleList,
        );
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompositingError::compile(&source.label, err.to_string()));
        }

        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            GpuProgram {
                label: source.label.clone(),
                strip,
                list,
                bind_group_layout,
                slots,
            },
        );
        Ok(handle)
    }

    fn allocate_buffer(&mut self, vertices: &[[f32; 2]]) -> CompositingResult<BufferHandle> {
        if vertices.is_empty() {
            return Err(CompositingError::backend("vertex buffer must not be empty"));
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("compositor.quad"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                vertex_count: vertices.len() as u32,
            },
        );
        Ok(handle)
    }

    fn allocate_color_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> CompositingResult<SurfaceHandle> {
        let surface = create_surface(&self.device, "compositor.offscreen", width, height)?;
        let handle = SurfaceHandle(self.next_id());
        self.surfaces.insert(handle, surface);
        Ok(handle)
    }

    fn bind_surface_as_texture(
        &mut self,
        surface: SurfaceHandle,
        slot: u32,
    ) -> CompositingResult<()> {
        if !self.surfaces.contains_key(&surface) {
            return Err(CompositingError::backend(format!(
                "cannot bind unknown surface {surface:?}"
            )));
        }
        self.texture_slots.insert(slot, surface);
        Ok(())
    }

    fn unbind_textures(&mut self) {
        self.texture_slots.clear();
    }

    fn draw(
        &mut self,
        program: ProgramHandle,
        buffer: BufferHandle,
        target: RenderTarget,
        primitive: PrimitiveKind,
        vertex_count: u32,
    ) -> CompositingResult<()> {
        let prog = self
            .programs
            .get(&program)
            .ok_or_else(|| CompositingError::backend(format!("unknown program {program:?}")))?;
        let buf = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| CompositingError::backend(format!("unknown buffer {buffer:?}")))?;
        if vertex_count > buf.vertex_count {
            return Err(CompositingError::backend(format!(
                "draw of {vertex_count} vertices exceeds buffer of {}",
                buf.vertex_count
            )));
        }
        if let RenderTarget::Surface(target_handle) = target {
            let feedback = prog
                .slots
                .iter()
                .any(|slot| self.texture_slots.get(slot) == Some(&target_handle));
            if feedback {
                return Err(CompositingError::backend(format!(
                    "surface {target_handle:?} is both the render target and a sampled texture"
                )));
            }
        }
        let out = self.target_surface(target)?;

        let bind_group = prog.bind_group_layout.as_ref().map(|layout| {
            let entries: Vec<wgpu::BindGroupEntry> = prog
                .slots
                .iter()
                .map(|slot| {
                    let view = self
                        .texture_slots
                        .get(slot)
                        .and_then(|handle| self.surfaces.get(handle))
                        .map_or(&self.fallback.view, |surface| &surface.view);
                    wgpu::BindGroupEntry {
                        binding: *slot,
                        resource: wgpu::BindingResource::TextureView(view),
                    }
                })
                .collect();
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("compositor.textures.bg"),
                layout,
                entries: &entries,
            })
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&prog.label),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&prog.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &out.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(match primitive {
                PrimitiveKind::TriangleStrip => &prog.strip,
                PrimitiveKind::TriangleList => &prog.list,
            });
            if let Some(bind_group) = bind_group.as_ref() {
                pass.set_bind_group(0, bind_group, &[]);
            }
            pass.set_vertex_buffer(0, buf.buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, target: RenderTarget) -> CompositingResult<PixelBuffer> {
        let surface = self.target_surface(target)?;
        let (width, height) = (surface.width, surface.height);
        let row_bytes = width * BYTES_PER_TEXEL;
        let padded_row_bytes = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("compositor.readback"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compositor.readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| CompositingError::backend(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| CompositingError::backend("readback channel closed"))?
            .map_err(|e| CompositingError::backend(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let mut out = PixelBuffer::new(width, height);
        // Texture rows run top-down; PixelBuffer rows run bottom-up.
        for row in 0..height {
            let start = (row * padded_row_bytes) as usize;
            let texels = mapped[start..start + row_bytes as usize].chunks_exact(BYTES_PER_TEXEL as usize);
            for (x, texel) in texels.enumerate() {
                let idx = out.index(x as u32, height - 1 - row);
                out.pixels[idx] = Rgba::from_array(bytemuck::pod_read_unaligned(texel));
            }
        }
        drop(mapped);
        readback.unmap();
        Ok(out)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        if let Some(gpu) = self.surfaces.remove(&surface) {
            gpu.texture.destroy();
        }
        self.texture_slots.retain(|_, bound| *bound != surface);
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            programs: self.programs.len(),
            buffers: self.buffers.len(),
            surfaces: self.surfaces.len(),
        }
    }
}
