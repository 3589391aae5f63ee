use porter_duff_compositor::renderer::backend::{GpuBackend, SoftwareBackend};
use porter_duff_compositor::renderer::fragment::presets;
use porter_duff_compositor::renderer::shader_ir::Expr;
use porter_duff_compositor::renderer::{FusionCompiler, MultiPassPipeline};
use porter_duff_compositor::{
    BlendOperator, CompositingError, DisplayHost, DriverOptions, DriverState, FrameClock,
    HeadlessHost, RenderLoopDriver, ShaderFragment, StrategyKind,
};

fn broken_source() -> ShaderFragment {
    // Samples a texture slot it never declares.
    ShaderFragment::source("broken", Expr::sample(6)).unwrap()
}

#[test]
fn invalid_fused_body_reports_diagnostic_and_leaks_nothing() {
    let mut backend = SoftwareBackend::new(16, 16);
    let err = FusionCompiler::new([16, 16])
        .compile(
            &mut backend,
            &broken_source(),
            &presets::red_horizontal_gradient(),
            BlendOperator::SourceOver,
        )
        .unwrap_err();
    let CompositingError::Compile { program, diagnostic } = &err else {
        panic!("expected compile error, got {err:?}");
    };
    assert!(program.contains("broken"));
    assert!(diagnostic.contains("Generated WGSL:"));
    assert!(err.is_fatal());
    assert!(backend.resource_counts().is_empty());
}

#[test]
fn invalid_pipeline_generator_rolls_back_everything() {
    let mut backend = SoftwareBackend::new(16, 16);
    let err = MultiPassPipeline::build(
        &mut backend,
        &broken_source(),
        &presets::red_horizontal_gradient(),
        [16, 16],
    )
    .unwrap_err();
    assert!(matches!(err, CompositingError::Compile { .. }));
    assert!(backend.resource_counts().is_empty());
}

#[test]
fn driver_drop_releases_every_resource() {
    let mut backend = SoftwareBackend::new(16, 16);
    {
        let mut driver = RenderLoopDriver::new(
            &mut backend,
            presets::blue_vertical_gradient(),
            presets::red_horizontal_gradient(),
            DriverOptions {
                strategy: StrategyKind::MultiPass,
                ..Default::default()
            },
        );
        driver.initialize().unwrap();
        driver.frame(0.016).unwrap();
        driver.switch_strategy(StrategyKind::Fused).unwrap();
        driver.frame(0.016).unwrap();
        let counts = driver.backend().resource_counts();
        assert_eq!(counts.programs, 2 + BlendOperator::ALL.len() + 1);
        assert_eq!(counts.surfaces, 2);
    }
    assert!(backend.resource_counts().is_empty());
}

#[test]
fn host_shuts_down_driver_after_fatal_frame() {
    let mut backend = SoftwareBackend::new(16, 16);
    {
        let mut driver = RenderLoopDriver::new(
            &mut backend,
            broken_source(),
            presets::red_horizontal_gradient(),
            DriverOptions::default(),
        );
        let mut host = HeadlessHost::new(10, FrameClock::Fixed(0.016));
        let err = host.run(&mut driver).unwrap_err();
        assert!(matches!(err, CompositingError::Compile { .. }));
        assert_eq!(driver.frames_rendered(), 0);
        // Shutdown returns the driver to idle even after a fatal error.
        assert_eq!(driver.state(), DriverState::Idle);
    }
    assert!(backend.resource_counts().is_empty());
}

#[test]
fn resize_recreates_surfaces_at_new_size() {
    let mut backend = SoftwareBackend::new(16, 16);
    {
        let mut driver = RenderLoopDriver::new(
            &mut backend,
            presets::blue_vertical_gradient(),
            presets::red_horizontal_gradient(),
            DriverOptions {
                strategy: StrategyKind::MultiPass,
                ..Default::default()
            },
        );
        driver.initialize().unwrap();
        driver.resize(32, 8).unwrap();
        driver.frame(0.016).unwrap();
        assert_eq!(driver.backend().resource_counts().surfaces, 2);
        let frame = driver.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (32, 8));
    }
    assert!(backend.resource_counts().is_empty());
}
