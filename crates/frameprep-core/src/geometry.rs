//! Resize and crop geometry for model input preparation.

use glam::{IVec2, UVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Short side most ImageNet-style classifiers expect.
pub const DEFAULT_TARGET_SHORT_SIDE: u32 = 224;
/// Floor applied to any requested short side.
pub const MIN_TARGET_SHORT_SIDE: u32 = 64;

/// Width and height of a surface in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub const ZERO: Self = Self::new(0, 0);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_uvec2(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

impl From<UVec2> for Dims {
    fn from(v: UVec2) -> Self {
        Self::new(v.x, v.y)
    }
}

impl From<Dims> for UVec2 {
    fn from(d: Dims) -> Self {
        d.as_uvec2()
    }
}

impl std::fmt::Display for Dims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scale `original` so its short side equals `target_short_side`, keeping
/// aspect ratio. Both sides are rounded to the nearest pixel.
///
/// Targets below [`MIN_TARGET_SHORT_SIDE`] are raised to it. A zero-area
/// input has no meaningful scale and returns [`Dims::ZERO`].
pub fn compute_target_dims(original: Dims, target_short_side: u32) -> Dims {
    if original.is_empty() {
        return Dims::ZERO;
    }
    let target = target_short_side.max(MIN_TARGET_SHORT_SIDE);
    let factor = f64::from(target) / f64::from(original.short_side());
    Dims::new(
        (f64::from(original.width) * factor).round() as u32,
        (f64::from(original.height) * factor).round() as u32,
    )
}

/// Integer crop rectangle `[offset, offset + size)` in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropRect {
    pub offset: UVec2,
    pub size: UVec2,
}

impl CropRect {
    pub const fn new(offset: UVec2, size: UVec2) -> Self {
        Self { offset, size }
    }

    /// Build from signed components, rejecting negative offsets and
    /// non-positive sizes.
    pub fn from_signed(offset: IVec2, size: IVec2) -> Result<Self, GeometryError> {
        if offset.x < 0 || offset.y < 0 {
            return Err(GeometryError::NegativeOffset { offset });
        }
        if size.x <= 0 || size.y <= 0 {
            return Err(GeometryError::NegativeSize { size });
        }
        Ok(Self::new(offset.as_uvec2(), size.as_uvec2()))
    }

    /// Integer footprint of a float crop: offset floored, size rounded.
    ///
    /// The blit crop draws this rectangle, so a fractional offset addresses
    /// the same texels as the integer path would for the snapped values.
    pub fn from_float(offset: Vec2, size: Vec2) -> Result<Self, GeometryError> {
        if !offset.is_finite() || !size.is_finite() {
            return Err(GeometryError::NonFinite);
        }
        let offset = offset.floor().as_ivec2();
        let size = size.round().as_ivec2();
        Self::from_signed(offset, size)
    }

    /// Largest centered rectangle of `size` inside `source`.
    pub fn centered(source: Dims, size: Dims) -> Result<Self, GeometryError> {
        let rect = Self::new(
            UVec2::new(
                source.width.saturating_sub(size.width) / 2,
                source.height.saturating_sub(size.height) / 2,
            ),
            size.as_uvec2(),
        );
        rect.validate(source)?;
        Ok(rect)
    }

    pub fn end(&self) -> UVec2 {
        self.offset + self.size
    }

    pub fn dims(&self) -> Dims {
        self.size.into()
    }

    /// Reject rectangles that are empty or reach outside `source`.
    pub fn validate(&self, source: Dims) -> Result<(), GeometryError> {
        if self.size.x == 0 || self.size.y == 0 {
            return Err(GeometryError::EmptyRegion { size: self.size });
        }
        let end = self.offset.saturating_add(self.size);
        let bounds = source.as_uvec2();
        if end.x > bounds.x || end.y > bounds.y {
            return Err(GeometryError::OutOfBounds {
                offset: self.offset,
                end,
                bounds,
            });
        }
        Ok(())
    }
}

/// Check that a destination surface has the dimensions an operation writes.
pub fn expect_dims(expected: Dims, actual: Dims) -> Result<(), GeometryError> {
    if expected != actual {
        return Err(GeometryError::SizeMismatch {
            expected: expected.as_uvec2(),
            actual: actual.as_uvec2(),
        });
    }
    Ok(())
}
