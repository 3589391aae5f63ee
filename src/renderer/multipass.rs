//! Multi-pass composition.
//!
//! Source and destination generators render into two offscreen surfaces; a
//! blend program then samples both and writes the visible surface. All
//! programs (two generators plus one sampled blend per registry operator) are
//! compiled when the pipeline is built, so switching operators never compiles.

use crate::error::{CompositingError, CompositingResult};

use super::backend::GpuBackend;
use super::blend::BlendOperator;
use super::fragment::{FragmentRole, ShaderFragment};
use super::fusion::CompiledProgram;
use super::types::{FragmentProgram, RenderTarget, SurfaceHandle};
use super::wgsl::{DESTINATION_SLOT, SOURCE_SLOT, generator_program, sampled_blend_program};

/// A color surface sized to the viewport.
#[derive(Debug)]
pub struct OffscreenSurface {
    surface: SurfaceHandle,
    width: u32,
    height: u32,
}

impl OffscreenSurface {
    pub fn allocate(backend: &mut dyn GpuBackend, width: u32, height: u32) -> CompositingResult<Self> {
        let surface = backend.allocate_color_surface(width, height)?;
        tracing::debug!(?surface, width, height, "offscreen surface allocated");
        Ok(Self {
            surface,
            width,
            height,
        })
    }

    pub fn handle(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn size(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.release_surface(self.surface);
    }
}

/// A generator program and the surface it renders into.
#[derive(Debug)]
struct GeneratorPass {
    program: CompiledProgram,
    surface: OffscreenSurface,
}

impl GeneratorPass {
    fn build(
        backend: &mut dyn GpuBackend,
        fragment: &ShaderFragment,
        resolution: [u32; 2],
    ) -> CompositingResult<Self> {
        let program = CompiledProgram::build(
            backend,
            format!("pass:{}", fragment.name()),
            generator_program(fragment),
            resolution,
        )?;
        match OffscreenSurface::allocate(backend, resolution[0], resolution[1]) {
            Ok(surface) => Ok(Self { program, surface }),
            Err(e) => {
                program.release(backend);
                Err(e)
            }
        }
    }

    fn release(self, backend: &mut dyn GpuBackend) {
        self.program.release(backend);
        self.surface.release(backend);
    }
}

/// Slots the pipeline feeds: the source surface and the destination surface.
pub fn check_declared_bindings(label: &str, program: &FragmentProgram) -> CompositingResult<()> {
    match program
        .declared_slots()
        .find(|slot| *slot != SOURCE_SLOT && *slot != DESTINATION_SLOT)
    {
        Some(slot) => Err(CompositingError::binding(format!(
            "'{label}' declares texture slot {slot}, but the pipeline only feeds slots \
             {SOURCE_SLOT} (source) and {DESTINATION_SLOT} (destination)"
        ))),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub struct MultiPassPipeline {
    resolution: [u32; 2],
    /// Source pass then destination pass.
    passes: Vec<GeneratorPass>,
    /// Registry order.
    blends: Vec<CompiledProgram>,
    active: BlendOperator,
}

impl MultiPassPipeline {
    /// Compile every program and allocate both surfaces up front.
    ///
    /// On any failure everything allocated so far is released before the error
    /// is returned.
    pub fn build(
        backend: &mut dyn GpuBackend,
        source: &ShaderFragment,
        destination: &ShaderFragment,
        resolution: [u32; 2],
    ) -> CompositingResult<Self> {
        source.expect_role(FragmentRole::SourceGenerator)?;
        destination.expect_role(FragmentRole::DestinationGenerator)?;
        for fragment in [source, destination] {
            if let Some(binding) = fragment.bindings().iter().next() {
                return Err(CompositingError::binding(format!(
                    "'{}' declares texture slot {}, but generator passes are fed no textures",
                    fragment.name(),
                    binding.texture_slot()
                )));
            }
        }

        let mut pipeline = Self {
            resolution,
            passes: Vec::with_capacity(2),
            blends: Vec::with_capacity(BlendOperator::ALL.len()),
            active: BlendOperator::SourceOver,
        };
        if let Err(e) = pipeline.allocate(backend, source, destination) {
            tracing::warn!(error = %e, "multi-pass pipeline build failed, rolling back");
            pipeline.release(backend);
            return Err(e);
        }
        tracing::debug!(
            source = source.name(),
            destination = destination.name(),
            programs = pipeline.passes.len() + pipeline.blends.len(),
            "multi-pass pipeline built"
        );
        Ok(pipeline)
    }

    fn allocate(
        &mut self,
        backend: &mut dyn GpuBackend,
        source: &ShaderFragment,
        destination: &ShaderFragment,
    ) -> CompositingResult<()> {
        for fragment in [source, destination] {
            let pass = GeneratorPass::build(backend, fragment, self.resolution)?;
            self.passes.push(pass);
        }
        for operator in BlendOperator::ALL {
            let label = format!("blend:{operator}");
            let program = sampled_blend_program(operator);
            check_declared_bindings(&label, &program)?;
            let compiled = CompiledProgram::build(backend, label, program, self.resolution)?;
            self.blends.push(compiled);
        }
        Ok(())
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    pub fn active_operator(&self) -> BlendOperator {
        self.active
    }

    pub fn set_operator(&mut self, operator: BlendOperator) {
        self.active = operator;
    }

    /// Reselect the active blend program by name. The previous selection is kept
    /// on error.
    pub fn select_operator(&mut self, name: &str) -> CompositingResult<BlendOperator> {
        let operator = BlendOperator::lookup(name)?;
        self.set_operator(operator);
        Ok(operator)
    }

    pub fn blend_program(&self, operator: BlendOperator) -> &CompiledProgram {
        &self.blends[operator as usize]
    }

    pub fn source_surface(&self) -> SurfaceHandle {
        self.passes[0].surface.handle()
    }

    pub fn destination_surface(&self) -> SurfaceHandle {
        self.passes[1].surface.handle()
    }

    /// Source pass, destination pass, then the active blend onto the screen.
    pub fn render_frame(&self, backend: &mut dyn GpuBackend) -> CompositingResult<()> {
        backend.unbind_textures();
        for pass in &self.passes {
            pass.program
                .draw(backend, RenderTarget::Surface(pass.surface.handle()))?;
        }

        let blend = self.blend_program(self.active);
        for (slot, pass) in [SOURCE_SLOT, DESTINATION_SLOT].into_iter().zip(&self.passes) {
            if blend.declares_slot(slot) {
                backend.bind_surface_as_texture(pass.surface.handle(), slot)?;
            }
        }
        blend.draw(backend, RenderTarget::Screen)
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.unbind_textures();
        for pass in self.passes {
            pass.release(backend);
        }
        for program in self.blends {
            program.release(backend);
        }
    }
}
