//! WGSL validation using the naga library.
//!
//! Every program text goes through here before a backend builds it, so a
//! rejected shader always surfaces as [`CompositingError::Compile`] carrying
//! naga's diagnostic and the numbered generated source.

use crate::error::{CompositingError, CompositingResult};

/// Parse and validate WGSL source code.
///
/// # Arguments
/// * `source` - The WGSL source code to validate
/// * `context` - Description of what generated this WGSL (e.g. "fused:gradient/xor fragment")
///
/// # Returns
/// The validated naga Module on success, or a compile error with the diagnostic on failure.
pub fn validate_wgsl(source: &str, context: &str) -> CompositingResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| CompositingError::compile(context, format_diagnostic(source, &e)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| CompositingError::compile(context, format_diagnostic(source, &e)))?;

    Ok(module)
}

/// naga's message followed by the numbered program text.
fn format_diagnostic(source: &str, error: &dyn std::fmt::Display) -> String {
    let mut output = String::new();

    output.push_str(&format!("  {error}\n"));

    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");

    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_resolution_const_and_texture_load() {
        let source = r#"
const RESOLUTION: vec2f = vec2f(8.0, 4.0);

@group(0) @binding(1)
var tex_1: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4f) -> @location(0) vec4f {
    let frag_coord = vec2f(position.x, RESOLUTION.y - position.y);
    return textureLoad(tex_1, vec2i(position.xy), 0) * (frag_coord.x / RESOLUTION.x);
}
"#;
        let module = validate_wgsl(source, "sampled").unwrap();
        assert_eq!(module.global_variables.len(), 1);
    }

    #[test]
    fn rejects_missing_return_type() {
        let err = validate_wgsl("@fragment fn fs_main() -> { }", "truncated").unwrap_err();
        assert!(matches!(err, CompositingError::Compile { .. }));
    }

    #[test]
    fn rejects_scalar_where_color_expected() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4f {
    return 0.5;
}
"#;
        assert!(validate_wgsl(source, "scalar output").is_err());
    }

    #[test]
    fn undeclared_texture_reports_numbered_source() {
        let source = r#"
@fragment
fn fs_main(@builtin(position) position: vec4f) -> @location(0) vec4f {
    return textureLoad(tex_7, vec2i(position.xy), 0);
}
"#;
        let err = validate_wgsl(source, "broken pass").unwrap_err();
        assert!(matches!(err, CompositingError::Compile { .. }));
        let msg = err.to_string();
        assert!(msg.contains("broken pass"));
        assert!(msg.contains("Generated WGSL:"));
        assert!(msg.contains("   4 |"));
    }
}
