//! Utility functions for the renderer module.

/// Full-viewport quad as a 4-vertex triangle strip, in clip space.
pub const FULLSCREEN_QUAD: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

pub const FULLSCREEN_QUAD_VERTEX_COUNT: u32 = FULLSCREEN_QUAD.len() as u32;

/// Format a float as a WGSL float literal (always with a decimal point or exponent).
pub fn fmt_f32(v: f32) -> String {
    if v.is_finite() {
        let s = format!("{v:?}");
        if s.contains(['.', 'e']) {
            s
        } else {
            format!("{s}.0")
        }
    } else {
        "0.0".to_string()
    }
}
