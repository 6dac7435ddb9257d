//! Runtime configuration for a transform pipeline.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::geometry::{DEFAULT_TARGET_SHORT_SIDE, MIN_TARGET_SHORT_SIDE};

/// Environment variable overriding [`PipelineConfig::backend`].
pub const BACKEND_ENV: &str = "FRAMEPREP_BACKEND";
/// Environment variable overriding [`PipelineConfig::target_short_side`].
pub const SHORT_SIDE_ENV: &str = "FRAMEPREP_SHORT_SIDE";

/// Default model input edge for the center crop.
const DEFAULT_CROP_SIZE: u32 = 224;
/// Free scratch surfaces kept for reuse.
const DEFAULT_SCRATCH_CAPACITY: usize = 8;

/// Which execution strategy a pipeline should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Compute dispatch when the device supports it, blit otherwise.
    #[default]
    Auto,
    /// Require compute dispatch. Initialization fails without it.
    Compute,
    /// Always blit through fragment shaders.
    Blit,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "compute" => Ok(Self::Compute),
            "blit" => Ok(Self::Blit),
            other => Err(format!("unknown backend `{other}`, expected auto|compute|blit")),
        }
    }
}

/// Knobs for one `TransformPipeline` instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Backend selection policy.
    pub backend: BackendPreference,
    /// Short side used by the preprocess chain's resize step.
    pub target_short_side: u32,
    /// Edge of the square center crop taken after resizing.
    pub crop_size: u32,
    /// Maximum number of idle scratch surfaces retained between calls.
    pub scratch_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            target_short_side: DEFAULT_TARGET_SHORT_SIDE,
            crop_size: DEFAULT_CROP_SIZE,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Defaults with `FRAMEPREP_BACKEND` / `FRAMEPREP_SHORT_SIDE` applied.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup(BACKEND_ENV) {
            match value.parse() {
                Ok(backend) => config.backend = backend,
                Err(err) => tracing::warn!("ignoring {BACKEND_ENV}: {err}"),
            }
        }
        if let Some(value) = lookup(SHORT_SIDE_ENV) {
            match value.trim().parse() {
                Ok(side) => config.target_short_side = side,
                Err(err) => tracing::warn!("ignoring {SHORT_SIDE_ENV}={value}: {err}"),
            }
        }
        config
    }

    /// Short side the preprocess resize actually produces.
    pub fn effective_short_side(&self) -> u32 {
        self.target_short_side.max(MIN_TARGET_SHORT_SIDE)
    }

    /// Reject settings the preprocess chain can never satisfy: an empty
    /// center crop, or one larger than the resized short side.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.crop_size == 0 {
            return Err(GeometryError::EmptyRegion {
                size: glam::UVec2::ZERO,
            });
        }
        let short_side = self.effective_short_side();
        if self.crop_size > short_side {
            return Err(GeometryError::CropExceedsResize {
                crop_size: self.crop_size,
                short_side,
            });
        }
        Ok(())
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }
}
