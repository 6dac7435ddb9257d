//! Per-channel normalization profile and its JSON loader.
//!
//! A profile is the `(mean, std, scale)` triple a model was trained with.
//! Every pixel channel is mapped through `(x - mean) / std * scale`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigParseError;

/// Mean/std/scale used to normalize RGB channels. Alpha is never touched.
///
/// `std` entries are expected to be non-zero; a zero produces infinities in
/// the output and is treated as a broken config, not something to guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationProfile {
    /// Per-channel mean subtracted first. Default: `[0, 0, 0]`.
    pub mean: [f32; 3],
    /// Per-channel divisor applied after the mean. Default: `[1, 1, 1]`.
    pub std: [f32; 3],
    /// Multiplier applied last. `0` means "unset" and loads as `1`.
    pub scale: f32,
}

impl Default for NormalizationProfile {
    /// The identity profile: normalization leaves pixels unchanged.
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl NormalizationProfile {
    pub const IDENTITY: Self = Self {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
        scale: 1.0,
    };

    /// Load a profile from an optional config blob.
    ///
    /// Missing or blank text yields [`Self::IDENTITY`]. Malformed text is
    /// logged and also yields the identity profile, so a bad asset never
    /// stops the caller from producing frames.
    pub fn load(config_text: Option<&str>) -> Self {
        let Some(text) = config_text.filter(|t| !t.trim().is_empty()) else {
            tracing::debug!("no normalization config supplied, using identity profile");
            return Self::IDENTITY;
        };

        match Self::parse(text) {
            Ok(profile) => {
                tracing::debug!(
                    mean = ?profile.mean,
                    std = ?profile.std,
                    scale = profile.scale,
                    "loaded normalization profile"
                );
                profile
            }
            Err(err) => {
                tracing::warn!("{err}; falling back to identity profile");
                Self::IDENTITY
            }
        }
    }

    /// Strict variant of [`Self::load`]: returns the decode error instead of
    /// falling back. Fields absent from the object keep their identity value.
    pub fn parse(text: &str) -> Result<Self, ConfigParseError> {
        let profile: Self = serde_json::from_str(text)?;
        Ok(profile.with_effective_scale())
    }

    /// Coerce a zero scale to `1.0`.
    pub fn with_effective_scale(mut self) -> Self {
        if self.scale == 0.0 {
            self.scale = 1.0;
        }
        self
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Normalize one RGBA pixel. Alpha passes through.
    pub fn normalize_pixel(&self, px: [f32; 4]) -> [f32; 4] {
        let mut out = px;
        for c in 0..3 {
            out[c] = (px[c] - self.mean[c]) / self.std[c] * self.scale;
        }
        out
    }

    /// Undo [`Self::normalize_pixel`].
    pub fn denormalize_pixel(&self, px: [f32; 4]) -> [f32; 4] {
        let mut out = px;
        for c in 0..3 {
            out[c] = px[c] * self.std[c] / self.scale + self.mean[c];
        }
        out
    }

    /// Uniform layout shared by the normalize shaders.
    pub fn to_gpu(&self) -> NormalizeParamsGpu {
        NormalizeParamsGpu {
            mean: [self.mean[0], self.mean[1], self.mean[2], 0.0],
            std: [self.std[0], self.std[1], self.std[2], 1.0],
            scale: self.scale,
            _pad: [0.0; 3],
        }
    }
}

/// `#[repr(C)]` mirror of the WGSL `NormalizeParams` struct.
///
/// `vec4` members keep the layout identical under uniform and storage rules.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NormalizeParamsGpu {
    pub mean: [f32; 4],
    pub std: [f32; 4],
    pub scale: f32,
    pub _pad: [f32; 3],
}
