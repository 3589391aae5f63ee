//! WGSL program assembly.
//!
//! This module handles:
//! - the shared full-screen quad vertex stage
//! - fragment programs for the three shapes the engine compiles: fused
//!   (generator + generator + blend), standalone generator, and texture-sampling
//!   blend
//! - lowering a [`FragmentProgram`] to a standalone WGSL fragment module

use std::collections::BTreeSet;

use super::blend::BlendOperator;
use super::fragment::ShaderFragment;
use super::shader_ir::{ColorInput, Expr};
use super::types::{Binding, FragmentProgram, ProgramSource};

/// Sampling slot the multi-pass blend reads the source surface from.
pub const SOURCE_SLOT: u32 = 0;
/// Sampling slot the multi-pass blend reads the destination surface from.
pub const DESTINATION_SLOT: u32 = 1;

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Shared vertex stage: passes the quad's clip-space position through.
pub const VERTEX_WGSL: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2f) -> @builtin(position) vec4f {
    return vec4f(position, 0.0, 1.0);
}
"#;

/// One program computing source, destination and blend inline.
pub fn fused_program(
    source: &ShaderFragment,
    destination: &ShaderFragment,
    operator: BlendOperator,
) -> FragmentProgram {
    let bindings = source
        .bindings()
        .iter()
        .chain(destination.bindings())
        .copied()
        .collect();
    FragmentProgram {
        locals: vec![
            (ColorInput::Src, source.body().clone()),
            (ColorInput::Dst, destination.body().clone()),
        ],
        output: operator.formula().clone(),
        bindings,
    }
}

/// A generator rendered on its own, as the multi-pass pipeline's first passes do.
pub fn generator_program(fragment: &ShaderFragment) -> FragmentProgram {
    FragmentProgram {
        locals: Vec::new(),
        output: fragment.body().clone(),
        bindings: fragment.bindings().clone(),
    }
}

/// A blend program that fetches its inputs from the surfaces bound at
/// [`SOURCE_SLOT`] and [`DESTINATION_SLOT`]. Only the slots the formula reads
/// are declared, so `clear` declares none.
pub fn sampled_blend_program(operator: BlendOperator) -> FragmentProgram {
    let (reads_src, reads_dst) = operator.inputs();
    let mut locals = Vec::new();
    let mut bindings = BTreeSet::new();
    if reads_src {
        locals.push((ColorInput::Src, Expr::sample(SOURCE_SLOT)));
        bindings.insert(Binding::Texture { slot: SOURCE_SLOT });
    }
    if reads_dst {
        locals.push((ColorInput::Dst, Expr::sample(DESTINATION_SLOT)));
        bindings.insert(Binding::Texture {
            slot: DESTINATION_SLOT,
        });
    }
    FragmentProgram {
        locals,
        output: operator.formula().clone(),
        bindings,
    }
}

pub fn build_program_source(
    label: impl Into<String>,
    program: FragmentProgram,
    resolution: [u32; 2],
) -> ProgramSource {
    let fragment = build_fragment_wgsl(&program, resolution);
    ProgramSource {
        label: label.into(),
        vertex: VERTEX_WGSL.to_string(),
        fragment,
        program,
        resolution,
    }
}

pub fn build_fragment_wgsl(program: &FragmentProgram, resolution: [u32; 2]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "const RESOLUTION: vec2f = vec2f({}.0, {}.0);\n\n",
        resolution[0], resolution[1]
    ));

    for slot in program.declared_slots() {
        out.push_str(&format!(
            "@group(0) @binding({slot})\nvar tex_{slot}: texture_2d<f32>;\n\n"
        ));
    }

    out.push_str(&format!(
        "@fragment\nfn {FRAGMENT_ENTRY}(@builtin(position) position: vec4f) -> @location(0) vec4f {{\n"
    ));
    // Window coordinates with a bottom-left origin.
    out.push_str("    let frag_coord = vec2f(position.x, RESOLUTION.y - position.y);\n");
    out.push_str("    var src_color = vec4f(0.0);\n");
    out.push_str("    var dst_color = vec4f(0.0);\n");
    for (local, expr) in &program.locals {
        out.push_str(&format!(
            "    {{\n        {} = {};\n    }}\n",
            local.wgsl_local(),
            expr.to_wgsl()
        ));
    }
    out.push_str(&format!("    return {};\n}}\n", program.output.to_wgsl()));
    out
}
