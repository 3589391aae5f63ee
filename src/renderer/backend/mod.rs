//! GPU backend contract and implementations.
//!
//! - `software`: deterministic CPU rasteriser; always available, used by tests
//! - `wgpu_backend`: headless wgpu device (feature `gpu`)

pub mod software;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

use std::path::Path;

use crate::color::{Rgba, max_or_nan};
use crate::error::{CompositingError, CompositingResult};

use super::types::{
    BufferHandle, PrimitiveKind, ProgramHandle, ProgramSource, RenderTarget, ResourceCounts,
    SurfaceHandle,
};

pub use software::SoftwareBackend;
#[cfg(feature = "gpu")]
pub use wgpu_backend::WgpuBackend;

/// What the compositing engine needs from a GPU.
///
/// Calls are synchronous and single-threaded; each draw is submitted in call
/// order, which is the only ordering the multi-pass pipeline relies on.
pub trait GpuBackend {
    fn name(&self) -> &'static str;

    /// Size of the visible surface.
    fn screen_size(&self) -> [u32; 2];

    /// Recreate the visible surface at a new size. Its contents are discarded.
    fn resize_screen(&mut self, width: u32, height: u32) -> CompositingResult<()>;

    /// Build an executable program. On failure nothing stays allocated.
    fn compile_program(&mut self, source: &ProgramSource) -> CompositingResult<ProgramHandle>;

    fn allocate_buffer(&mut self, vertices: &[[f32; 2]]) -> CompositingResult<BufferHandle>;

    fn allocate_color_surface(&mut self, width: u32, height: u32)
    -> CompositingResult<SurfaceHandle>;

    /// Make `surface` readable by programs that declare a texture at `slot`.
    fn bind_surface_as_texture(&mut self, surface: SurfaceHandle, slot: u32)
    -> CompositingResult<()>;

    fn unbind_textures(&mut self);

    fn draw(
        &mut self,
        program: ProgramHandle,
        buffer: BufferHandle,
        target: RenderTarget,
        primitive: PrimitiveKind,
        vertex_count: u32,
    ) -> CompositingResult<()>;

    fn read_pixels(&mut self, target: RenderTarget) -> CompositingResult<PixelBuffer>;

    fn release_program(&mut self, program: ProgramHandle);

    fn release_buffer(&mut self, buffer: BufferHandle);

    fn release_surface(&mut self, surface: SurfaceHandle);

    fn resource_counts(&self) -> ResourceCounts;
}

impl<T: GpuBackend + ?Sized> GpuBackend for &mut T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn screen_size(&self) -> [u32; 2] {
        (**self).screen_size()
    }

    fn resize_screen(&mut self, width: u32, height: u32) -> CompositingResult<()> {
        (**self).resize_screen(width, height)
    }

    fn compile_program(&mut self, source: &ProgramSource) -> CompositingResult<ProgramHandle> {
        (**self).compile_program(source)
    }

    fn allocate_buffer(&mut self, vertices: &[[f32; 2]]) -> CompositingResult<BufferHandle> {
        (**self).allocate_buffer(vertices)
    }

    fn allocate_color_surface(&mut self, width: u32, height: u32)
    -> CompositingResult<SurfaceHandle> {
        (**self).allocate_color_surface(width, height)
    }

    fn bind_surface_as_texture(&mut self, surface: SurfaceHandle, slot: u32)
    -> CompositingResult<()> {
        (**self).bind_surface_as_texture(surface, slot)
    }

    fn unbind_textures(&mut self) {
        (**self).unbind_textures()
    }

    fn draw(
        &mut self,
        program: ProgramHandle,
        buffer: BufferHandle,
        target: RenderTarget,
        primitive: PrimitiveKind,
        vertex_count: u32,
    ) -> CompositingResult<()> {
        (**self).draw(program, buffer, target, primitive, vertex_count)
    }

    fn read_pixels(&mut self, target: RenderTarget) -> CompositingResult<PixelBuffer> {
        (**self).read_pixels(target)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        (**self).release_program(program)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        (**self).release_buffer(buffer)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) {
        (**self).release_surface(surface)
    }

    fn resource_counts(&self) -> ResourceCounts {
        (**self).resource_counts()
    }
}

/// CPU copy of a render target.
///
/// Rows are stored bottom-up so `pixel(x, y)` uses the same window coordinates
/// the shaders see in `frag_coord`.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba::TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        (x < self.width && y < self.height).then(|| self.pixels[self.index(x, y)])
    }

    /// Largest per-channel difference over all pixels, or `None` when sizes
    /// differ. A NaN anywhere makes the result NaN.
    pub fn max_abs_diff(&self, other: &PixelBuffer) -> Option<f32> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        Some(
            self.pixels
                .iter()
                .zip(&other.pixels)
                .map(|(a, b)| a.max_abs_diff(*b))
                .fold(0.0, max_or_nan),
        )
    }

    /// 8-bit sRGB image, top row first.
    pub fn to_rgba8_image(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(self.width, self.height, |x, row| {
            let y = self.height - 1 - row;
            image::Rgba(self.pixels[self.index(x, y)].to_srgb8())
        })
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> CompositingResult<()> {
        let path = path.as_ref();
        self.to_rgba8_image()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| {
                CompositingError::Other(anyhow::anyhow!(
                    "failed to save png {}: {e}",
                    path.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_is_bounds_checked() {
        let buf = PixelBuffer::new(2, 3);
        assert_eq!(buf.pixel(1, 2), Some(Rgba::TRANSPARENT));
        assert_eq!(buf.pixel(2, 0), None);
        assert_eq!(buf.pixel(0, 3), None);
    }

    #[test]
    fn image_export_flips_rows() {
        let mut buf = PixelBuffer::new(1, 2);
        // bottom row white, top row transparent
        buf.pixels[0] = Rgba::new(1.0, 1.0, 1.0, 1.0);
        let img = buf.to_rgba8_image();
        assert_eq!(img.get_pixel(0, 1).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn max_abs_diff_requires_equal_sizes() {
        let a = PixelBuffer::new(2, 2);
        let b = PixelBuffer::new(2, 1);
        assert_eq!(a.max_abs_diff(&b), None);
        let mut c = a.clone();
        c.pixels[3] = Rgba::new(0.0, 0.25, 0.0, 0.0);
        assert_eq!(a.max_abs_diff(&c), Some(0.25));
    }

    #[test]
    fn max_abs_diff_reports_nan_pixels() {
        let a = PixelBuffer::new(2, 1);
        let mut b = a.clone();
        b.pixels[1] = Rgba::new(0.0, 0.0, f32::NAN, 1.0);
        assert!(a.max_abs_diff(&b).is_some_and(f32::is_nan));
        assert!(b.max_abs_diff(&a).is_some_and(f32::is_nan));
    }
}
