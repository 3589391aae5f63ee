//! Render loop driver.
//!
//! Owns the backend, both composition strategies and the selected operator.
//! Each frame tick updates the frame-time window and issues exactly one
//! `render_frame` on the active strategy.

use std::fmt;
use std::io::Write;

use crate::error::{CompositingError, CompositingResult};
use crate::perf::RollingWindow;
use crate::renderer::backend::{GpuBackend, PixelBuffer};
use crate::renderer::blend::BlendOperator;
use crate::renderer::fragment::ShaderFragment;
use crate::renderer::strategy::{
    CompositionStrategy, FusedStrategy, MultiPassStrategy, StrategyKind,
};
use crate::renderer::types::RenderTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Compiling,
    Steady,
    Rendering,
    Fatal,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverState::Idle => "idle",
            DriverState::Compiling => "compiling",
            DriverState::Steady => "steady",
            DriverState::Rendering => "rendering",
            DriverState::Fatal => "fatal",
        })
    }
}

#[derive(Clone, Debug)]
pub struct DriverOptions {
    pub strategy: StrategyKind,
    pub operator: BlendOperator,
    /// Advance to the next registry operator every N rendered frames. Zero is
    /// rejected by `initialize`.
    pub cycle_every: Option<u64>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Fused,
            operator: BlendOperator::SourceOver,
            cycle_every: None,
        }
    }
}

pub struct RenderLoopDriver<B: GpuBackend> {
    backend: B,
    source: ShaderFragment,
    destination: ShaderFragment,
    fused: FusedStrategy,
    multi_pass: MultiPassStrategy,
    active: StrategyKind,
    operator: BlendOperator,
    state: DriverState,
    perf: RollingWindow,
    cycle_every: Option<u64>,
    frames_rendered: u64,
    compiles: u64,
    fps_out: Option<Box<dyn Write>>,
}

impl<B: GpuBackend> RenderLoopDriver<B> {
    pub fn new(
        backend: B,
        source: ShaderFragment,
        destination: ShaderFragment,
        options: DriverOptions,
    ) -> Self {
        let resolution = backend.screen_size();
        Self {
            fused: FusedStrategy::new(source.clone(), destination.clone(), resolution),
            multi_pass: MultiPassStrategy::new(source.clone(), destination.clone(), resolution),
            backend,
            source,
            destination,
            active: options.strategy,
            operator: options.operator,
            state: DriverState::Idle,
            perf: RollingWindow::default(),
            cycle_every: options.cycle_every,
            frames_rendered: 0,
            compiles: 0,
            fps_out: None,
        }
    }

    /// Write a carriage-return-prefixed FPS line here after every frame.
    pub fn with_fps_output(mut self, out: Box<dyn Write>) -> Self {
        self.fps_out = Some(out);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn operator(&self) -> BlendOperator {
        self.operator
    }

    pub fn strategy(&self) -> StrategyKind {
        self.active
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Number of times the driver entered `Compiling`.
    pub fn compile_count(&self) -> u64 {
        self.compiles
    }

    pub fn perf(&self) -> &RollingWindow {
        &self.perf
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// `Idle → Compiling → Steady`, or `Fatal` when the active strategy cannot
    /// be built.
    pub fn initialize(&mut self) -> CompositingResult<()> {
        match self.state {
            DriverState::Idle => {}
            DriverState::Fatal => return Err(self.fatal_error()),
            _ => return Ok(()),
        }
        if self.cycle_every == Some(0) {
            return Err(CompositingError::config("cycle_every must be at least 1"));
        }
        tracing::info!(
            backend = self.backend.name(),
            strategy = %self.active,
            operator = %self.operator,
            source = self.source.name(),
            destination = self.destination.name(),
            "initializing"
        );
        self.apply()
    }

    /// One frame tick: `Steady → Rendering → Steady`.
    pub fn frame(&mut self, frame_duration_secs: f64) -> CompositingResult<()> {
        match self.state {
            DriverState::Steady => {}
            DriverState::Fatal => return Err(self.fatal_error()),
            other => {
                return Err(CompositingError::backend(format!(
                    "frame requested while driver is {other}"
                )));
            }
        }

        if let Some(every) = self.cycle_every {
            if self.frames_rendered > 0 && self.frames_rendered % every == 0 {
                self.next_operator()?;
            }
        }

        self.transition(DriverState::Rendering);
        self.perf.update(frame_duration_secs);
        let operator = self.operator;
        let (strategy, backend) = self.active_parts();
        if let Err(e) = strategy.render_frame(backend, operator) {
            return Err(self.fail(e));
        }
        self.frames_rendered += 1;
        self.report_fps();
        self.transition(DriverState::Steady);
        Ok(())
    }

    /// Select a new operator. Only the fused strategy recompiles.
    pub fn set_operator(&mut self, operator: BlendOperator) -> CompositingResult<()> {
        if operator == self.operator {
            return Ok(());
        }
        tracing::info!(from = %self.operator, to = %operator, "operator changed");
        self.operator = operator;
        self.apply_if_running()
    }

    /// Like [`set_operator`](Self::set_operator), by name. Unknown names are
    /// reported and leave the driver untouched.
    pub fn set_operator_by_name(&mut self, name: &str) -> CompositingResult<()> {
        let operator = BlendOperator::lookup(name).inspect_err(|e| {
            tracing::warn!(error = %e, "operator change rejected");
        })?;
        self.set_operator(operator)
    }

    pub fn next_operator(&mut self) -> CompositingResult<BlendOperator> {
        let next = self.operator.next();
        self.set_operator(next)?;
        Ok(next)
    }

    /// Switch strategies. The previous strategy keeps its programs until
    /// shutdown; switching back to an already built multi-pass pipeline does not
    /// compile.
    pub fn switch_strategy(&mut self, kind: StrategyKind) -> CompositingResult<()> {
        if kind == self.active {
            return Ok(());
        }
        tracing::info!(from = %self.active, to = %kind, "strategy changed");
        self.active = kind;
        self.apply_if_running()
    }

    /// Resize the visible surface and rebuild both strategies at the new size.
    /// Only the active strategy is compiled right away.
    pub fn resize(&mut self, width: u32, height: u32) -> CompositingResult<()> {
        if width == 0 || height == 0 {
            return Err(CompositingError::config(format!(
                "cannot resize to {width}x{height}"
            )));
        }
        if self.backend.screen_size() == [width, height] {
            return Ok(());
        }
        tracing::debug!(width, height, "resizing");
        self.release_strategies();
        if let Err(e) = self.backend.resize_screen(width, height) {
            return Err(self.fail(e));
        }
        let resolution = [width, height];
        self.fused = FusedStrategy::new(self.source.clone(), self.destination.clone(), resolution);
        self.multi_pass =
            MultiPassStrategy::new(self.source.clone(), self.destination.clone(), resolution);
        self.apply_if_running()
    }

    /// Copy of the visible surface as last rendered.
    pub fn read_frame(&mut self) -> CompositingResult<PixelBuffer> {
        self.backend.read_pixels(RenderTarget::Screen)
    }

    /// Release every backend resource regardless of the active strategy.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.release_strategies();
        if self.state != DriverState::Idle {
            tracing::debug!(frames = self.frames_rendered, "driver shut down");
        }
        self.state = DriverState::Idle;
    }

    fn release_strategies(&mut self) {
        self.backend.unbind_textures();
        self.fused.release(&mut self.backend);
        self.multi_pass.release(&mut self.backend);
    }

    fn apply_if_running(&mut self) -> CompositingResult<()> {
        match self.state {
            DriverState::Idle => Ok(()),
            DriverState::Fatal => Err(self.fatal_error()),
            _ => self.apply(),
        }
    }

    /// Bring the active strategy in line with the selected operator, entering
    /// `Compiling` only when the strategy actually has to compile.
    fn apply(&mut self) -> CompositingResult<()> {
        let operator = self.operator;
        let needs_compile = self.active_strategy().requires_compile(operator);
        if needs_compile {
            self.compiles += 1;
            self.transition(DriverState::Compiling);
        }
        let (strategy, backend) = self.active_parts();
        if let Err(e) = strategy.prepare(backend, operator) {
            return Err(self.fail(e));
        }
        self.transition(DriverState::Steady);
        Ok(())
    }

    fn active_strategy(&self) -> &dyn CompositionStrategy {
        match self.active {
            StrategyKind::Fused => &self.fused,
            StrategyKind::MultiPass => &self.multi_pass,
        }
    }

    fn active_parts(&mut self) -> (&mut dyn CompositionStrategy, &mut dyn GpuBackend) {
        let strategy: &mut dyn CompositionStrategy = match self.active {
            StrategyKind::Fused => &mut self.fused,
            StrategyKind::MultiPass => &mut self.multi_pass,
        };
        (strategy, &mut self.backend)
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "driver state");
            self.state = next;
        }
    }

    fn fail(&mut self, error: CompositingError) -> CompositingError {
        tracing::error!(strategy = %self.active, operator = %self.operator, "{error}");
        self.transition(DriverState::Fatal);
        error
    }

    fn fatal_error(&self) -> CompositingError {
        CompositingError::backend("driver is in a fatal state; shut down and rebuild")
    }

    fn report_fps(&mut self) {
        let line = self.perf.format_fps_line();
        if let Some(out) = self.fps_out.as_mut() {
            // Best effort.
            let _ = write!(out, "\r{line}").and_then(|()| out.flush());
        }
    }
}

impl<B: GpuBackend> Drop for RenderLoopDriver<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
