//! frameprep core — domain layer for model-input frame preparation.
//!
//! Normalization profiles, resize/crop geometry, pipeline configuration and
//! CPU reference transforms. No GPU dependencies.

pub mod config;
pub mod error;
pub mod geometry;
pub mod image;
pub mod profile;

// Re-exports for convenience.
pub use config::{BackendPreference, PipelineConfig};
pub use error::{ConfigParseError, GeometryError, ImageLoadError};
pub use geometry::{CropRect, DEFAULT_TARGET_SHORT_SIDE, Dims, compute_target_dims};
pub use image::FrameImage;
pub use profile::{NormalizationProfile, NormalizeParamsGpu};
