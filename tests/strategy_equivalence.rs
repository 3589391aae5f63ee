use porter_duff_compositor::renderer::backend::{GpuBackend, PixelBuffer, SoftwareBackend};
use porter_duff_compositor::renderer::fragment::presets;
use porter_duff_compositor::renderer::types::RenderTarget;
use porter_duff_compositor::renderer::wgsl::{DESTINATION_SLOT, SOURCE_SLOT};
use porter_duff_compositor::renderer::{FusionCompiler, MultiPassPipeline};
use porter_duff_compositor::{BlendOperator, FragmentSet, Rgba, ShaderFragment};

fn render_fused(
    size: [u32; 2],
    src: &ShaderFragment,
    dst: &ShaderFragment,
    op: BlendOperator,
) -> PixelBuffer {
    let mut backend = SoftwareBackend::new(size[0], size[1]);
    let fused = FusionCompiler::new(size)
        .compile(&mut backend, src, dst, op)
        .expect("fused compile");
    fused
        .program
        .draw(&mut backend, RenderTarget::Screen)
        .expect("fused draw");
    let frame = backend.read_pixels(RenderTarget::Screen).expect("read back");
    fused.program.release(&mut backend);
    assert!(backend.resource_counts().is_empty());
    frame
}

fn render_multipass(
    size: [u32; 2],
    src: &ShaderFragment,
    dst: &ShaderFragment,
    op: BlendOperator,
) -> PixelBuffer {
    let mut backend = SoftwareBackend::new(size[0], size[1]);
    let mut pipeline = MultiPassPipeline::build(&mut backend, src, dst, size).expect("build");
    pipeline.set_operator(op);
    pipeline.render_frame(&mut backend).expect("render");
    let frame = backend.read_pixels(RenderTarget::Screen).expect("read back");
    pipeline.release(&mut backend);
    assert!(backend.resource_counts().is_empty());
    frame
}

#[test]
fn fused_and_multipass_are_pixel_identical() {
    let size = [24, 16];
    for set in [FragmentSet::Gradients, FragmentSet::Ramps] {
        let (src, dst) = set.fragments();
        let mut backend = SoftwareBackend::new(size[0], size[1]);
        let mut pipeline = MultiPassPipeline::build(&mut backend, &src, &dst, size).unwrap();
        for op in BlendOperator::ALL {
            pipeline.set_operator(op);
            pipeline.render_frame(&mut backend).unwrap();
            let multi = backend.read_pixels(RenderTarget::Screen).unwrap();
            let fused = render_fused(size, &src, &dst, op);
            assert!(fused.pixels.iter().all(|p| p.is_finite()), "{set:?} / {op}");
            assert_eq!(
                fused.max_abs_diff(&multi),
                Some(0.0),
                "{set:?} / {op}: strategies disagree"
            );
        }
        pipeline.release(&mut backend);
    }
}

#[test]
fn source_over_gradients_match_analytic_result_at_center() {
    let size = [512, 512];
    let src = presets::blue_vertical_gradient();
    let dst = presets::red_horizontal_gradient();

    let x = 256.5 / 512.0;
    let y = 256.5 / 512.0;
    // src = (0, 0, y, 0.5), dst = (x, 0, 0, 0.5); src + dst * (1 - 0.5)
    let expected = Rgba::new(x * 0.5, 0.0, y, 0.75);

    for frame in [
        render_fused(size, &src, &dst, BlendOperator::SourceOver),
        render_multipass(size, &src, &dst, BlendOperator::SourceOver),
    ] {
        let got = frame.pixel(256, 256).unwrap();
        assert!(
            got.approx_eq(expected, 1e-5),
            "pixel (256,256) = {got:?}, expected {expected:?}"
        );
    }
}

#[test]
fn origin_is_bottom_left() {
    let size = [8, 8];
    let frame = render_fused(
        size,
        &presets::blue_vertical_gradient(),
        &presets::red_horizontal_gradient(),
        BlendOperator::Source,
    );
    let bottom = frame.pixel(0, 0).unwrap();
    let top = frame.pixel(0, 7).unwrap();
    assert!((bottom.b - 0.5 / 8.0).abs() < 1e-6);
    assert!((top.b - 7.5 / 8.0).abs() < 1e-6);
}

#[test]
fn omitted_bindings_are_not_bound() {
    let size = [8, 8];
    let src = presets::blue_alpha_ramp();
    let dst = presets::red_double_ramp();
    let mut backend = SoftwareBackend::new(size[0], size[1]);
    let mut pipeline = MultiPassPipeline::build(&mut backend, &src, &dst, size).unwrap();

    let cases = [
        (BlendOperator::Clear, vec![]),
        (BlendOperator::Copy, vec![SOURCE_SLOT]),
        (BlendOperator::Destination, vec![DESTINATION_SLOT]),
        (BlendOperator::SourceIn, vec![SOURCE_SLOT, DESTINATION_SLOT]),
    ];
    for (op, slots) in cases {
        backend.clear_draw_log();
        pipeline.set_operator(op);
        pipeline.render_frame(&mut backend).unwrap();
        let blend_draw = backend.draw_log().last().cloned().unwrap();
        let bound: Vec<u32> = blend_draw.textures.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(bound, slots, "{op}");
        for slot in [SOURCE_SLOT, DESTINATION_SLOT] {
            assert_eq!(backend.bound_texture(slot).is_some(), slots.contains(&slot), "{op}");
        }
    }

    // `clear` draws without any texture and still produces transparent black.
    pipeline.set_operator(BlendOperator::Clear);
    pipeline.render_frame(&mut backend).unwrap();
    let frame = backend.read_pixels(RenderTarget::Screen).unwrap();
    assert!(frame.pixels.iter().all(|p| *p == Rgba::TRANSPARENT));

    // `destination` reads only slot 1 and reproduces the destination generator.
    pipeline.set_operator(BlendOperator::Destination);
    pipeline.render_frame(&mut backend).unwrap();
    let frame = backend.read_pixels(RenderTarget::Screen).unwrap();
    let dst_surface = backend
        .read_pixels(RenderTarget::Surface(pipeline.destination_surface()))
        .unwrap();
    assert_eq!(frame.max_abs_diff(&dst_surface), Some(0.0));
    pipeline.release(&mut backend);
}
