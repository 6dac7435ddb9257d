//! CPU-side frame representation and reference transforms.
//!
//! The GPU backends are checked against these implementations; they use the
//! same texel addressing and interpolation as the shaders.

use std::path::Path;

use crate::error::{GeometryError, ImageLoadError};
use crate::geometry::{CropRect, Dims};
use crate::profile::NormalizationProfile;

/// RGBA f32 frame, row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Pixel data, `width * height` entries.
    pub pixels: Vec<[f32; 4]>,
}

impl FrameImage {
    /// A frame filled with one color.
    pub fn solid(dims: Dims, color: [f32; 4]) -> Self {
        Self {
            width: dims.width,
            height: dims.height,
            pixels: vec![color; dims.pixel_count()],
        }
    }

    /// Build a frame by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(dims: Dims, mut f: impl FnMut(u32, u32) -> [f32; 4]) -> Self {
        let mut pixels = Vec::with_capacity(dims.pixel_count());
        for y in 0..dims.height {
            for x in 0..dims.width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width: dims.width,
            height: dims.height,
            pixels,
        }
    }

    /// Decode an image file (PNG, JPEG, TIFF, EXR, ...) into RGBA f32.
    ///
    /// Integer formats map to `[0, 1]`; float formats pass through.
    pub fn open(path: &Path) -> Result<Self, ImageLoadError> {
        let decoded = ::image::open(path)?;
        Ok(Self::from_dynamic(&decoded))
    }

    pub fn from_dynamic(decoded: &::image::DynamicImage) -> Self {
        let rgba = decoded.to_rgba32f();
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            pixels: rgba.pixels().map(|p| p.0).collect(),
        }
    }

    /// Quantize to 8-bit RGBA, clamping to `[0, 1]`. Normalized frames
    /// should be denormalized first.
    pub fn to_rgba8(&self) -> ::image::RgbaImage {
        ::image::RgbaImage::from_fn(self.width, self.height, |x, y| {
            let px = self.pixel(x, y);
            ::image::Rgba(px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        })
    }

    pub fn dims(&self) -> Dims {
        Dims::new(self.width, self.height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Apply `profile` to every pixel in place.
    pub fn normalize(&mut self, profile: &NormalizationProfile) {
        for px in &mut self.pixels {
            *px = profile.normalize_pixel(*px);
        }
    }

    /// Invert [`Self::normalize`] in place.
    pub fn denormalize(&mut self, profile: &NormalizationProfile) {
        for px in &mut self.pixels {
            *px = profile.denormalize_pixel(*px);
        }
    }

    /// Copy out the region covered by `rect`.
    pub fn crop(&self, rect: &CropRect) -> Result<Self, GeometryError> {
        rect.validate(self.dims())?;
        Ok(Self::from_fn(rect.dims(), |x, y| {
            self.pixel(rect.offset.x + x, rect.offset.y + y)
        }))
    }

    /// Bilinear resample to `dims`, pixel centers aligned, edges clamped.
    pub fn resize(&self, dims: Dims) -> Self {
        let scale_x = self.width as f32 / dims.width as f32;
        let scale_y = self.height as f32 / dims.height as f32;
        Self::from_fn(dims, |x, y| {
            let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (self.width - 1) as f32);
            let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (self.height - 1) as f32);
            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(self.width - 1);
            let y1 = (y0 + 1).min(self.height - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let top = lerp4(self.pixel(x0, y0), self.pixel(x1, y0), fx);
            let bottom = lerp4(self.pixel(x0, y1), self.pixel(x1, y1), fx);
            lerp4(top, bottom, fy)
        })
    }

    /// Largest per-channel absolute difference between two same-size frames.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        assert_eq!(self.dims(), other.dims(), "frames differ in size");
        self.pixels
            .iter()
            .zip(&other.pixels)
            .flat_map(|(a, b)| (0..4).map(move |c| (a[c] - b[c]).abs()))
            .fold(0.0, f32::max)
    }
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|c| a[c] + (b[c] - a[c]) * t)
}
