use glam::UVec2;

/// The normalization blob could not be decoded.
///
/// Recovered inside [`crate::profile::NormalizationProfile::load`]; only
/// [`crate::profile::NormalizationProfile::parse`] hands it to callers.
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("invalid normalization config: {0}")]
    Json(#[from] serde_json::Error),
}

/// A crop or resize request that does not fit the surfaces involved.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("crop size must be non-zero, got {size}")]
    EmptyRegion { size: UVec2 },
    #[error("crop offset must be non-negative, got {offset}")]
    NegativeOffset { offset: glam::IVec2 },
    #[error("crop size must be positive, got {size}")]
    NegativeSize { size: glam::IVec2 },
    #[error("crop rectangle has non-finite components")]
    NonFinite,
    #[error("crop [{offset}, {end}) exceeds source bounds {bounds}")]
    OutOfBounds { offset: UVec2, end: UVec2, bounds: UVec2 },
    #[error("destination is {actual}, expected {expected}")]
    SizeMismatch { expected: UVec2, actual: UVec2 },
    #[error("center crop {crop_size} is larger than the resized short side {short_side}")]
    CropExceedsResize { crop_size: u32, short_side: u32 },
}

/// A frame file could not be read or decoded.
#[derive(Debug, thiserror::Error)]
pub enum ImageLoadError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] ::image::ImageError),
}
