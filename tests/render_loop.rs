use std::io::Write;
use std::sync::{Arc, Mutex};

use porter_duff_compositor::renderer::backend::SoftwareBackend;
use porter_duff_compositor::renderer::fragment::presets;
use porter_duff_compositor::{
    BlendOperator, DisplayHost, DriverOptions, DriverState, FrameClock, HeadlessHost,
    RenderLoopDriver, RollingWindow, StrategyKind,
};
use proptest::prelude::*;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn driver(strategy: StrategyKind, cycle_every: Option<u64>) -> RenderLoopDriver<SoftwareBackend> {
    RenderLoopDriver::new(
        SoftwareBackend::new(16, 16),
        presets::blue_vertical_gradient(),
        presets::red_horizontal_gradient(),
        DriverOptions {
            strategy,
            operator: BlendOperator::SourceOver,
            cycle_every,
        },
    )
}

#[test]
fn rolling_window_empty_is_zero() {
    assert_eq!(RollingWindow::default().average(), 0.0);
}

#[test]
fn rolling_window_full_of_constant_averages_to_constant() {
    let mut window = RollingWindow::default();
    for _ in 0..64 {
        window.update(0.02);
    }
    assert!((window.average() - 0.02).abs() < 1e-12);
}

#[test]
fn rolling_window_evicts_first_sample_on_65th_update() {
    let mut window = RollingWindow::default();
    window.update(64.0);
    for _ in 0..64 {
        window.update(1.0);
    }
    assert_eq!(window.len(), 64);
    assert_eq!(window.average(), 1.0);
}

proptest! {
    #[test]
    fn rolling_window_is_mean_of_last_64(samples in prop::collection::vec(0.0f64..1.0, 0..200)) {
        let mut window = RollingWindow::default();
        for s in &samples {
            window.update(*s);
        }
        let tail = &samples[samples.len().saturating_sub(64)..];
        let expected = if tail.is_empty() {
            0.0
        } else {
            tail.iter().sum::<f64>() / tail.len() as f64
        };
        prop_assert!((window.average() - expected).abs() < 1e-9);
    }
}

#[test]
fn each_frame_prints_one_fps_line() {
    let out = Captured::default();
    let mut d = driver(StrategyKind::Fused, None).with_fps_output(Box::new(out.clone()));
    let summary = HeadlessHost::new(3, FrameClock::Fixed(0.02))
        .run(&mut d)
        .unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(out.text(), "\rfps: 50.00".repeat(3));
}

#[test]
fn multipass_cycling_never_recompiles() {
    let mut d = driver(StrategyKind::MultiPass, Some(1));
    HeadlessHost::new(30, FrameClock::Fixed(0.01))
        .run(&mut d)
        .unwrap();
    assert_eq!(d.compile_count(), 1);
    assert_eq!(d.frames_rendered(), 30);
    // 29 advances from source-over, wrapping around the 13 operators.
    let start = BlendOperator::ALL
        .iter()
        .position(|op| *op == BlendOperator::SourceOver)
        .unwrap();
    assert_eq!(d.operator(), BlendOperator::ALL[(start + 29) % 13]);
}

#[test]
fn fused_cycling_recompiles_per_operator_change() {
    let mut d = driver(StrategyKind::Fused, Some(2));
    HeadlessHost::new(6, FrameClock::Fixed(0.01))
        .run(&mut d)
        .unwrap();
    // Initial compile plus advances before frames 2 and 4.
    assert_eq!(d.compile_count(), 3);
}

#[test]
fn switching_strategy_back_to_built_pipeline_skips_compiling() {
    let mut d = driver(StrategyKind::MultiPass, None);
    d.initialize().unwrap();
    d.switch_strategy(StrategyKind::Fused).unwrap();
    assert_eq!(d.compile_count(), 2);
    d.switch_strategy(StrategyKind::MultiPass).unwrap();
    assert_eq!(d.compile_count(), 2);
    d.set_operator(BlendOperator::Xor).unwrap();
    assert_eq!(d.compile_count(), 2);
    assert_eq!(d.state(), DriverState::Steady);
    d.frame(0.016).unwrap();
}

#[test]
fn strategies_render_same_frame_through_driver() {
    let mut fused = driver(StrategyKind::Fused, None);
    let mut multi = driver(StrategyKind::MultiPass, None);
    for d in [&mut fused, &mut multi] {
        d.initialize().unwrap();
        d.set_operator(BlendOperator::SourceAtop).unwrap();
        d.frame(0.016).unwrap();
    }
    let a = fused.read_frame().unwrap();
    let b = multi.read_frame().unwrap();
    assert_eq!(a.max_abs_diff(&b), Some(0.0));
}
