use std::ops::{Add, Mul};

/// A linear RGBA color with premultiplied alpha, one `f32` per channel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_array([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }

    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Largest per-channel difference. NaN if any channel difference is NaN.
    pub fn max_abs_diff(self, other: Rgba) -> f32 {
        self.to_array()
            .into_iter()
            .zip(other.to_array())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, max_or_nan)
    }

    pub fn is_finite(self) -> bool {
        self.to_array().into_iter().all(f32::is_finite)
    }

    pub fn approx_eq(self, other: Rgba, tolerance: f32) -> bool {
        self.max_abs_diff(other) <= tolerance
    }

    /// Encode as straight-alpha 8-bit sRGB for display/export.
    pub fn to_srgb8(self) -> [u8; 4] {
        let a = clamp01(self.a);
        let unpremul = |c: f32| if a > 0.0 { clamp01(c / a) } else { 0.0 };
        [
            to_u8(linear_to_srgb_channel(unpremul(self.r))),
            to_u8(linear_to_srgb_channel(unpremul(self.g))),
            to_u8(linear_to_srgb_channel(unpremul(self.b))),
            to_u8(a),
        ]
    }
}

impl Add for Rgba {
    type Output = Rgba;

    fn add(self, rhs: Rgba) -> Rgba {
        Rgba::new(
            self.r + rhs.r,
            self.g + rhs.g,
            self.b + rhs.b,
            self.a + rhs.a,
        )
    }
}

impl Mul<f32> for Rgba {
    type Output = Rgba;

    fn mul(self, k: f32) -> Rgba {
        Rgba::new(self.r * k, self.g * k, self.b * k, self.a * k)
    }
}

impl From<[f32; 4]> for Rgba {
    fn from(v: [f32; 4]) -> Self {
        Rgba::from_array(v)
    }
}

fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

fn to_u8(x: f32) -> u8 {
    (clamp01(x) * 255.0).round() as u8
}

fn linear_to_srgb_channel(x: f32) -> f32 {
    // https://en.wikipedia.org/wiki/SRGB
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

/// `f32::max` that keeps NaN instead of discarding it.
pub(crate) fn max_or_nan(acc: f32, v: f32) -> f32 {
    if acc.is_nan() || v.is_nan() {
        f32::NAN
    } else {
        acc.max(v)
    }
}
