//! Composition strategies behind one interface, so the driver and host do not
//! care whether a frame comes from a fused program or the multi-pass pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{CompositingError, CompositingResult};

use super::backend::GpuBackend;
use super::blend::BlendOperator;
use super::fragment::ShaderFragment;
use super::fusion::{FusedProgram, FusionCompiler};
use super::multipass::MultiPassPipeline;
use super::types::RenderTarget;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Fused,
    MultiPass,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Fused => "fused",
            StrategyKind::MultiPass => "multi-pass",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait CompositionStrategy {
    fn kind(&self) -> StrategyKind;

    /// Whether rendering `operator` needs a compile first.
    fn requires_compile(&self, operator: BlendOperator) -> bool;

    /// Make the strategy ready to render `operator`, compiling if needed.
    fn prepare(&mut self, backend: &mut dyn GpuBackend, operator: BlendOperator)
    -> CompositingResult<()>;

    /// Issue one frame's draws for `operator` into the visible surface.
    fn render_frame(&mut self, backend: &mut dyn GpuBackend, operator: BlendOperator)
    -> CompositingResult<()>;

    /// Release every backend resource the strategy holds. Safe to call twice.
    fn release(&mut self, backend: &mut dyn GpuBackend);
}

/// One fused program per operator, rebuilt whenever the operator changes.
#[derive(Debug)]
pub struct FusedStrategy {
    compiler: FusionCompiler,
    source: ShaderFragment,
    destination: ShaderFragment,
    current: Option<FusedProgram>,
}

impl FusedStrategy {
    pub fn new(source: ShaderFragment, destination: ShaderFragment, resolution: [u32; 2]) -> Self {
        Self {
            compiler: FusionCompiler::new(resolution),
            source,
            destination,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&FusedProgram> {
        self.current.as_ref()
    }
}

impl CompositionStrategy for FusedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fused
    }

    fn requires_compile(&self, operator: BlendOperator) -> bool {
        self.current
            .as_ref()
            .is_none_or(|fused| fused.operator != operator)
    }

    fn prepare(
        &mut self,
        backend: &mut dyn GpuBackend,
        operator: BlendOperator,
    ) -> CompositingResult<()> {
        if !self.requires_compile(operator) {
            return Ok(());
        }
        // The old program goes either way; a failed compile is fatal for this
        // configuration.
        let fused = self
            .compiler
            .compile(backend, &self.source, &self.destination, operator);
        self.release(backend);
        self.current = Some(fused?);
        Ok(())
    }

    fn render_frame(
        &mut self,
        backend: &mut dyn GpuBackend,
        operator: BlendOperator,
    ) -> CompositingResult<()> {
        match &self.current {
            Some(fused) if fused.operator == operator => fused
                .program
                .draw(backend, RenderTarget::Screen),
            _ => Err(CompositingError::backend(format!(
                "no fused program compiled for '{operator}'"
            ))),
        }
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(fused) = self.current.take() {
            fused.program.release(backend);
        }
    }
}

/// The multi-pass pipeline, built once and reselected per operator.
#[derive(Debug)]
pub struct MultiPassStrategy {
    source: ShaderFragment,
    destination: ShaderFragment,
    resolution: [u32; 2],
    pipeline: Option<MultiPassPipeline>,
}

impl MultiPassStrategy {
    pub fn new(source: ShaderFragment, destination: ShaderFragment, resolution: [u32; 2]) -> Self {
        Self {
            source,
            destination,
            resolution,
            pipeline: None,
        }
    }

    pub fn pipeline(&self) -> Option<&MultiPassPipeline> {
        self.pipeline.as_ref()
    }
}

impl CompositionStrategy for MultiPassStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiPass
    }

    fn requires_compile(&self, _operator: BlendOperator) -> bool {
        self.pipeline.is_none()
    }

    fn prepare(
        &mut self,
        backend: &mut dyn GpuBackend,
        operator: BlendOperator,
    ) -> CompositingResult<()> {
        if self.pipeline.is_none() {
            let pipeline =
                MultiPassPipeline::build(backend, &self.source, &self.destination, self.resolution)?;
            self.pipeline = Some(pipeline);
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_operator(operator);
        }
        Ok(())
    }

    fn render_frame(
        &mut self,
        backend: &mut dyn GpuBackend,
        operator: BlendOperator,
    ) -> CompositingResult<()> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| CompositingError::backend("multi-pass pipeline not built"))?;
        pipeline.set_operator(operator);
        pipeline.render_frame(backend)
    }

    fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.release(backend);
        }
    }
}

/// A fresh, unprepared strategy of the given kind.
pub fn build_strategy(
    kind: StrategyKind,
    source: ShaderFragment,
    destination: ShaderFragment,
    resolution: [u32; 2],
) -> Box<dyn CompositionStrategy> {
    match kind {
        StrategyKind::Fused => Box::new(FusedStrategy::new(source, destination, resolution)),
        StrategyKind::MultiPass => Box::new(MultiPassStrategy::new(source, destination, resolution)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::SoftwareBackend;
    use crate::renderer::fragment::presets;
    use crate::renderer::shader_ir::Expr;

    fn gradients() -> (ShaderFragment, ShaderFragment) {
        (
            presets::blue_vertical_gradient(),
            presets::red_horizontal_gradient(),
        )
    }

    #[test]
    fn fused_recompiles_only_on_operator_change() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (src, dst) = gradients();
        let mut strategy = FusedStrategy::new(src, dst, [4, 4]);
        assert!(strategy.requires_compile(BlendOperator::SourceOver));

        strategy.prepare(&mut backend, BlendOperator::SourceOver).unwrap();
        assert!(!strategy.requires_compile(BlendOperator::SourceOver));
        assert!(strategy.requires_compile(BlendOperator::Xor));

        strategy.prepare(&mut backend, BlendOperator::Xor).unwrap();
        // The old program was released.
        assert_eq!(backend.resource_counts().programs, 1);

        strategy.release(&mut backend);
        strategy.release(&mut backend);
        assert!(backend.resource_counts().is_empty());
    }

    #[test]
    fn fused_render_needs_matching_program() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (src, dst) = gradients();
        let mut strategy = FusedStrategy::new(src, dst, [4, 4]);
        strategy.prepare(&mut backend, BlendOperator::Clear).unwrap();
        assert!(strategy.render_frame(&mut backend, BlendOperator::Clear).is_ok());
        let err = strategy
            .render_frame(&mut backend, BlendOperator::Copy)
            .unwrap_err();
        assert!(matches!(err, CompositingError::BackendResource(_)));
    }

    #[test]
    fn fused_compile_failure_leaves_nothing_allocated() {
        let mut backend = SoftwareBackend::new(4, 4);
        let broken = ShaderFragment::source("undeclared-sample", Expr::sample(1)).unwrap();
        let mut strategy =
            FusedStrategy::new(broken, presets::red_horizontal_gradient(), [4, 4]);
        let err = strategy
            .prepare(&mut backend, BlendOperator::SourceOver)
            .unwrap_err();
        assert!(matches!(err, CompositingError::Compile { .. }));
        assert!(strategy.current().is_none());
        assert!(backend.resource_counts().is_empty());
    }

    #[test]
    fn multipass_never_recompiles_after_build() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (src, dst) = gradients();
        let mut strategy = MultiPassStrategy::new(src, dst, [4, 4]);
        assert!(strategy.requires_compile(BlendOperator::SourceOver));
        strategy.prepare(&mut backend, BlendOperator::SourceOver).unwrap();
        let programs = backend.resource_counts().programs;

        for op in BlendOperator::ALL {
            assert!(!strategy.requires_compile(op));
            strategy.prepare(&mut backend, op).unwrap();
            strategy.render_frame(&mut backend, op).unwrap();
        }
        assert_eq!(backend.resource_counts().programs, programs);
        assert_eq!(
            strategy.pipeline().map(|p| p.active_operator()),
            Some(BlendOperator::Xor)
        );
    }

    #[test]
    fn kind_names_match_config_values() {
        assert_eq!(StrategyKind::MultiPass.to_string(), "multi-pass");
        assert_eq!(
            serde_json::to_string(&StrategyKind::MultiPass).unwrap(),
            "\"multi-pass\""
        );
        let boxed = build_strategy(
            StrategyKind::MultiPass,
            presets::blue_vertical_gradient(),
            presets::red_horizontal_gradient(),
            [2, 2],
        );
        assert_eq!(boxed.kind(), StrategyKind::MultiPass);
    }
}
