//! Fusion compiler: source generator, destination generator and blend operator
//! stitched into a single fragment program.
//!
//! The fused program computes `src_color` and `dst_color` as locals and blends
//! them in the same invocation, so no offscreen surfaces or extra passes are
//! involved. Every call builds a fresh backend program; callers keep the
//! returned [`CompiledProgram`] for as long as the configuration is in use.

use crate::error::{CompositingError, CompositingResult};

use super::backend::GpuBackend;
use super::blend::BlendOperator;
use super::fragment::{FragmentRole, ShaderFragment};
use super::types::{BufferHandle, FragmentProgram, PrimitiveKind, ProgramHandle, RenderTarget};
use super::utils::{FULLSCREEN_QUAD, FULLSCREEN_QUAD_VERTEX_COUNT};
use super::wgsl::{build_program_source, fused_program};

/// A backend program plus the full-screen quad it is drawn with.
///
/// Never mutated after creation; release it with [`CompiledProgram::release`].
#[derive(Debug)]
pub struct CompiledProgram {
    label: String,
    program: ProgramHandle,
    quad: BufferHandle,
    fragment: FragmentProgram,
}

impl CompiledProgram {
    /// Compile `fragment` and allocate its quad. Nothing stays allocated on failure.
    pub fn build(
        backend: &mut dyn GpuBackend,
        label: impl Into<String>,
        fragment: FragmentProgram,
        resolution: [u32; 2],
    ) -> CompositingResult<Self> {
        let source = build_program_source(label, fragment, resolution);
        let program = backend.compile_program(&source)?;
        let quad = match backend.allocate_buffer(&FULLSCREEN_QUAD) {
            Ok(quad) => quad,
            Err(e) => {
                backend.release_program(program);
                return Err(e);
            }
        };
        tracing::debug!(program = %source.label, "program compiled");
        Ok(Self {
            label: source.label,
            program,
            quad,
            fragment: source.program,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn handle(&self) -> ProgramHandle {
        self.program
    }

    pub fn fragment(&self) -> &FragmentProgram {
        &self.fragment
    }

    pub fn declares_slot(&self, slot: u32) -> bool {
        self.fragment.declares_slot(slot)
    }

    /// Draw the full-screen quad into `target`.
    pub fn draw(&self, backend: &mut dyn GpuBackend, target: RenderTarget) -> CompositingResult<()> {
        backend.draw(
            self.program,
            self.quad,
            target,
            PrimitiveKind::TriangleStrip,
            FULLSCREEN_QUAD_VERTEX_COUNT,
        )
    }

    pub fn release(self, backend: &mut dyn GpuBackend) {
        backend.release_program(self.program);
        backend.release_buffer(self.quad);
    }
}

/// A fused program together with the operator it was built for.
#[derive(Debug)]
pub struct FusedProgram {
    pub operator: BlendOperator,
    pub program: CompiledProgram,
}

#[derive(Clone, Copy, Debug)]
pub struct FusionCompiler {
    resolution: [u32; 2],
}

impl FusionCompiler {
    pub fn new(resolution: [u32; 2]) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    /// Build one program running `source`, then `destination`, then `operator`.
    ///
    /// Fails with `CompileError` when the backend rejects the fused text. Fused
    /// programs never sample textures, so generators declaring texture bindings
    /// are rejected before anything reaches the backend.
    pub fn compile(
        &self,
        backend: &mut dyn GpuBackend,
        source: &ShaderFragment,
        destination: &ShaderFragment,
        operator: BlendOperator,
    ) -> CompositingResult<FusedProgram> {
        source.expect_role(FragmentRole::SourceGenerator)?;
        destination.expect_role(FragmentRole::DestinationGenerator)?;
        for fragment in [source, destination] {
            if !fragment.bindings().is_empty() {
                return Err(CompositingError::binding(format!(
                    "'{}' declares texture bindings, but fused programs sample no textures",
                    fragment.name()
                )));
            }
        }

        let label = format!(
            "fused:{}+{}/{}",
            source.name(),
            destination.name(),
            operator
        );
        let fragment = fused_program(source, destination, operator);
        let program = CompiledProgram::build(backend, label, fragment, self.resolution)?;
        Ok(FusedProgram { operator, program })
    }
}
