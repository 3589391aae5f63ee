//! CPU reference backend.
//!
//! Programs are validated as WGSL exactly like the GPU path, then executed per
//! pixel by evaluating their expression trees. Rasterisation covers pixel
//! centres inside each triangle; every draw clears its target first, matching
//! the wgpu backend's load op.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::color::Rgba;
use crate::error::{CompositingError, CompositingResult};
use crate::renderer::shader_ir::{ColorInput, EvalEnv};
use crate::renderer::types::{
    BufferHandle, FragmentProgram, PrimitiveKind, ProgramHandle, ProgramSource, RenderTarget,
    ResourceCounts, SurfaceHandle,
};
use crate::renderer::validation::validate_wgsl;

use super::{GpuBackend, PixelBuffer};

const DRAW_LOG_CAPACITY: usize = 256;

/// One executed draw, kept for inspection by tests and debugging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub label: String,
    pub target: RenderTarget,
    /// Slot → surface actually supplied to the program.
    pub textures: Vec<(u32, SurfaceHandle)>,
}

#[derive(Debug)]
struct SoftwareProgram {
    label: String,
    program: FragmentProgram,
    resolution: [f32; 2],
}

#[derive(Debug)]
pub struct SoftwareBackend {
    screen: PixelBuffer,
    programs: HashMap<ProgramHandle, SoftwareProgram>,
    buffers: HashMap<BufferHandle, Vec<[f32; 2]>>,
    surfaces: HashMap<SurfaceHandle, PixelBuffer>,
    texture_slots: BTreeMap<u32, SurfaceHandle>,
    next_id: u32,
    surface_limit: Option<usize>,
    draw_log: VecDeque<DrawRecord>,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: PixelBuffer::new(width, height),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            surfaces: HashMap::new(),
            texture_slots: BTreeMap::new(),
            next_id: 1,
            surface_limit: None,
            draw_log: VecDeque::new(),
        }
    }

    /// Fail color-surface allocation once `limit` surfaces are live.
    pub fn with_surface_limit(mut self, limit: usize) -> Self {
        self.surface_limit = Some(limit);
        self
    }

    pub fn bound_texture(&self, slot: u32) -> Option<SurfaceHandle> {
        self.texture_slots.get(&slot).copied()
    }

    pub fn draw_log(&self) -> impl Iterator<Item = &DrawRecord> {
        self.draw_log.iter()
    }

    pub fn clear_draw_log(&mut self) {
        self.draw_log.clear();
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target_size(&self, target: RenderTarget) -> CompositingResult<[u32; 2]> {
        match target {
            RenderTarget::Screen => Ok([self.screen.width, self.screen.height]),
            RenderTarget::Surface(handle) => self
                .surfaces
                .get(&handle)
                .map(|s| [s.width, s.height])
                .ok_or_else(|| CompositingError::backend(format!("unknown surface {handle:?}"))),
        }
    }

    fn take_target(&mut self, target: RenderTarget) -> CompositingResult<PixelBuffer> {
        match target {
            RenderTarget::Screen => Ok(std::mem::replace(&mut self.screen, PixelBuffer::new(0, 0))),
            RenderTarget::Surface(handle) => self
                .surfaces
                .remove(&handle)
                .ok_or_else(|| CompositingError::backend(format!("unknown surface {handle:?}"))),
        }
    }

    fn put_target(&mut self, target: RenderTarget, pixels: PixelBuffer) {
        match target {
            RenderTarget::Screen => self.screen = pixels,
            RenderTarget::Surface(handle) => {
                self.surfaces.insert(handle, pixels);
            }
        }
    }

    fn rasterize(
        &self,
        program: &SoftwareProgram,
        vertices: &[[f32; 2]],
        primitive: PrimitiveKind,
        textures: &[(u32, SurfaceHandle)],
        out: &mut PixelBuffer,
    ) {
        let (w, h) = (out.width, out.height);
        out.pixels.fill(Rgba::TRANSPARENT);
        let mut covered = vec![false; out.pixels.len()];

        let window: Vec<[f32; 2]> = vertices
            .iter()
            .map(|v| [(v[0] + 1.0) * 0.5 * w as f32, (v[1] + 1.0) * 0.5 * h as f32])
            .collect();

        for tri in triangles(&window, primitive) {
            let min_x = tri.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
            let max_x = tri.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
            let min_y = tri.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
            let max_y = tri.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);
            let x0 = (min_x - 0.5).ceil().max(0.0) as u32;
            let y0 = (min_y - 0.5).ceil().max(0.0) as u32;
            let x1 = ((max_x - 0.5).floor().max(-1.0) as i64 + 1).clamp(0, i64::from(w)) as u32;
            let y1 = ((max_y - 0.5).floor().max(-1.0) as i64 + 1).clamp(0, i64::from(h)) as u32;

            for y in y0..y1 {
                for x in x0..x1 {
                    let idx = out.index(x, y);
                    if covered[idx] || !contains(&tri, [x as f32 + 0.5, y as f32 + 0.5]) {
                        continue;
                    }
                    covered[idx] = true;
                    out.pixels[idx] = self.shade(program, textures, x, y, h);
                }
            }
        }
    }

    fn shade(
        &self,
        program: &SoftwareProgram,
        textures: &[(u32, SurfaceHandle)],
        x: u32,
        y: u32,
        target_height: u32,
    ) -> Rgba {
        let sample = |slot: u32| {
            textures
                .iter()
                .find(|(s, _)| *s == slot)
                .and_then(|(_, handle)| self.surfaces.get(handle))
                .and_then(|tex| tex.pixel(x, y))
                .unwrap_or(Rgba::TRANSPARENT)
        };
        // Same derivation as the WGSL stage: flip the top-left framebuffer row.
        let row_from_top = (target_height - 1 - y) as f32 + 0.5;
        let mut env = EvalEnv {
            frag_coord: [x as f32 + 0.5, program.resolution[1] - row_from_top],
            resolution: program.resolution,
            src: Rgba::TRANSPARENT,
            dst: Rgba::TRANSPARENT,
            sample: &sample,
        };
        for (local, expr) in &program.program.locals {
            let value = expr.eval(&env).to_color();
            match local {
                ColorInput::Src => env.src = value,
                ColorInput::Dst => env.dst = value,
            }
        }
        program.program.output.eval(&env).to_color()
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn screen_size(&self) -> [u32; 2] {
        [self.screen.width, self.screen.height]
    }

    fn resize_screen(&mut self, width: u32, height: u32) -> CompositingResult<()> {
        if width == 0 || height == 0 {
            return Err(CompositingError::backend(format!(
                "screen size must be non-zero, got {width}x{height}"
            )));
        }
        self.screen = PixelBuffer::new(width, height);
        Ok(())
    }

    fn compile_program(&mut self, source: &ProgramSource) -> CompositingResult<ProgramHandle> {
        validate_wgsl(&source.vertex, &format!("{} (vertex stage)", source.label))?;
        validate_wgsl(&source.fragment, &format!("{} (fragment stage)", source.label))?;

        let handle = ProgramHandle(self.next_id());
        self.programs.insert(
            handle,
            SoftwareProgram {
                label: source.label.clone(),
                program: source.program.clone(),
                resolution: [source.resolution[0] as f32, source.resolution[1] as f32],
            },
        );
        tracing::debug!(program = %source.label, ?handle, "software program compiled");
        Ok(handle)
    }

    fn allocate_buffer(&mut self, vertices: &[[f32; 2]]) -> CompositingResult<BufferHandle> {
        if vertices.is_empty() {
            return Err(CompositingError::backend("cannot allocate an empty vertex buffer"));
        }
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(handle, vertices.to_vec());
        Ok(handle)
    }

    fn allocate_color_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> CompositingResult<SurfaceHandle> {
        if width == 0 || height == 0 {
            return Err(CompositingError::backend(format!(
                "color surface size must be non-zero, got {width}x{height}"
            )));
        }
        if let Some(limit) = self.surface_limit {
            if self.surfaces.len() >= limit {
                return Err(CompositingError::backend(format!(
                    "color surface limit reached ({limit} live surfaces)"
                )));
            }
        }
        let handle = SurfaceHandle(self.next_id());
        self.surfaces.insert(handle, PixelBuffer::new(width, height));
        Ok(handle)
    }

    fn bind_surface_as_texture(
        &mut self,
        surface: SurfaceHandle,
        slot: u32,
    ) -> CompositingResult<()> {
        if !self.surfaces.contains_key(&surface) {
            return Err(CompositingError::backend(format!(
                "cannot bind unknown surface {surface:?} to slot {slot}"
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
        let vertices = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| CompositingError::backend(format!("unknown buffer {buffer:?}")))?;
        if vertex_count as usize > vertices.len() {
            return Err(CompositingError::backend(format!(
                "draw of {vertex_count} vertices exceeds buffer of {}",
                vertices.len()
            )));
        }
        self.target_size(target)?;

        // Unbound declared slots are simply absent and sample as transparent black.
        let textures: Vec<(u32, SurfaceHandle)> = prog
            .program
            .declared_slots()
            .filter_map(|slot| self.texture_slots.get(&slot).map(|h| (slot, *h)))
            .collect();
        if let RenderTarget::Surface(target_handle) = target {
            if textures.iter().any(|(_, h)| *h == target_handle) {
                return Err(CompositingError::backend(format!(
                    "surface {target_handle:?} is both the render target and a sampled texture"
                )));
            }
        }
        let label = prog.label.clone();
        let vertices = vertices[..vertex_count as usize].to_vec();

        let mut out = self.take_target(target)?;
        if let Some(prog) = self.programs.get(&program) {
            self.rasterize(prog, &vertices, primitive, &textures, &mut out);
        }
        self.put_target(target, out);

        if self.draw_log.len() == DRAW_LOG_CAPACITY {
            self.draw_log.pop_front();
        }
        self.draw_log.push_back(DrawRecord {
            program,
            label,
            target,
            textures,
        });
        Ok(())
    }

    fn read_pixels(&mut self, target: RenderTarget) -> CompositingResult<PixelBuffer> {
        match target {
            RenderTarget::Screen => Ok(self.screen.clone()),
            RenderTarget::Surface(handle) => self
                .surfaces
                .get(&handle)
                .cloned()
                .ok_or_else(|| CompositingError::backend(format!("unknown surface {handle:?}"))),
        }
    }

    fn release_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        self.surfaces.remove(&surface);
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

fn triangles(vertices: &[[f32; 2]], primitive: PrimitiveKind) -> Vec<[[f32; 2]; 3]> {
    match primitive {
        PrimitiveKind::TriangleStrip => vertices
            .windows(3)
            .map(|w| [w[0], w[1], w[2]])
            .collect(),
        PrimitiveKind::TriangleList => vertices
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect(),
    }
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Inclusive point-in-triangle test, independent of winding.
fn contains(tri: &[[f32; 2]; 3], p: [f32; 2]) -> bool {
    let e0 = edge(tri[0], tri[1], p);
    let e1 = edge(tri[1], tri[2], p);
    let e2 = edge(tri[2], tri[0], p);
    (e0 >= 0.0 && e1 >= 0.0 && e2 >= 0.0) || (e0 <= 0.0 && e1 <= 0.0 && e2 <= 0.0)
}
