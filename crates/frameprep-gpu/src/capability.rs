//! Backend capability probing and selection.
//!
//! The decision is made once per pipeline from a [`DeviceCapabilities`]
//! snapshot. Adapter capabilities do not change while a process runs, so
//! nothing downstream re-queries the device.

use std::fmt;

use frameprep_core::BackendPreference;

use crate::buffers::SURFACE_FORMAT;
use crate::error::PrepError;

/// Tile edge for every compute kernel (8×8 = 64 invocations).
pub const WORKGROUP_SIZE: u32 = 8;

/// Snapshot of what the device can do, taken from the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub backend: wgpu::Backend,
    /// `DownlevelFlags::COMPUTE_SHADERS` was reported.
    pub compute_shaders: bool,
    /// `SURFACE_FORMAT` is usable as a render attachment. Downlevel GL
    /// adapters without float color buffers report `false`.
    pub blit_supported: bool,
    pub max_storage_textures_per_stage: u32,
    pub max_invocations_per_workgroup: u32,
    pub max_texture_dimension_2d: u32,
}

impl DeviceCapabilities {
    /// Inspect an adapter/device pair. Limits come from the device because
    /// they are what wgpu validates dispatches against.
    pub fn detect(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Self {
        let downlevel = adapter.get_downlevel_capabilities();
        let limits = device.limits();
        let format_features = adapter.get_texture_format_features(SURFACE_FORMAT);
        Self {
            backend: adapter.get_info().backend,
            compute_shaders: downlevel
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
            blit_supported: format_features
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
            max_storage_textures_per_stage: limits.max_storage_textures_per_shader_stage,
            max_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
        }
    }

    /// Whether the compute kernels can run: compute shaders, a writable
    /// storage texture, and room for an 8×8 workgroup.
    pub fn supports_compute(&self) -> bool {
        self.compute_shaders
            && self.max_storage_textures_per_stage >= 1
            && self.max_invocations_per_workgroup >= WORKGROUP_SIZE * WORKGROUP_SIZE
    }

    /// Whether the fragment-shader backend can render into scratch surfaces.
    pub fn supports_blit(&self) -> bool {
        self.blit_supported
    }
}

/// The two execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Compute-shader dispatch into write-enabled scratch surfaces.
    Compute,
    /// Full-screen draw through a fragment shader into a render target.
    Blit,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Compute => write!(f, "compute"),
            BackendKind::Blit => write!(f, "blit"),
        }
    }
}

/// Captured capability decision for one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSelector {
    supports_compute: bool,
    supports_blit: bool,
    kind: BackendKind,
}

impl BackendSelector {
    /// Resolve `preference` against the device.
    ///
    /// `Auto` takes compute when available and blit otherwise. A forced
    /// backend the device cannot run, or `Auto` on a device that supports
    /// neither, is a [`PrepError::CapabilityMismatch`].
    pub fn select(
        capabilities: &DeviceCapabilities,
        preference: BackendPreference,
    ) -> Result<Self, PrepError> {
        let supports_compute = capabilities.supports_compute();
        let supports_blit = capabilities.supports_blit();
        let kind = match preference {
            BackendPreference::Auto | BackendPreference::Compute if supports_compute => {
                BackendKind::Compute
            }
            BackendPreference::Auto | BackendPreference::Blit if supports_blit => BackendKind::Blit,
            BackendPreference::Compute => {
                return Err(PrepError::CapabilityMismatch {
                    operation: "initialize",
                    backend: BackendKind::Compute,
                });
            }
            BackendPreference::Auto | BackendPreference::Blit => {
                return Err(PrepError::CapabilityMismatch {
                    operation: "initialize",
                    backend: BackendKind::Blit,
                });
            }
        };
        Ok(Self {
            supports_compute,
            supports_blit,
            kind,
        })
    }

    pub fn supports_compute(&self) -> bool {
        self.supports_compute
    }

    pub fn supports_blit(&self) -> bool {
        self.supports_blit
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(compute_shaders: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            backend: wgpu::Backend::Vulkan,
            compute_shaders,
            blit_supported: true,
            max_storage_textures_per_stage: 4,
            max_invocations_per_workgroup: 256,
            max_texture_dimension_2d: 8192,
        }
    }

    #[test]
    fn test_auto_prefers_compute() {
        let selector = BackendSelector::select(&caps(true), BackendPreference::Auto).unwrap();
        assert_eq!(selector.kind(), BackendKind::Compute);
        assert!(selector.supports_compute());
    }

    #[test]
    fn test_auto_falls_back_to_blit() {
        let selector = BackendSelector::select(&caps(false), BackendPreference::Auto).unwrap();
        assert_eq!(selector.kind(), BackendKind::Blit);
        assert!(!selector.supports_compute());
    }

    #[test]
    fn test_forced_blit_on_compute_device() {
        let selector = BackendSelector::select(&caps(true), BackendPreference::Blit).unwrap();
        assert_eq!(selector.kind(), BackendKind::Blit);
        assert!(selector.supports_compute());
    }

    #[test]
    fn test_forced_compute_without_support_fails() {
        let err = BackendSelector::select(&caps(false), BackendPreference::Compute).unwrap_err();
        assert!(matches!(err, PrepError::CapabilityMismatch { .. }));
    }

    #[test]
    fn test_no_storage_textures_means_no_compute() {
        let mut caps = caps(true);
        caps.max_storage_textures_per_stage = 0;
        assert!(!caps.supports_compute());
    }

    #[test]
    fn test_tiny_workgroup_limit_means_no_compute() {
        let mut caps = caps(true);
        caps.max_invocations_per_workgroup = 32;
        assert!(!caps.supports_compute());
    }

    #[test]
    fn test_forced_blit_without_renderable_format_fails() {
        let caps = DeviceCapabilities {
            blit_supported: false,
            ..caps(true)
        };
        let err = BackendSelector::select(&caps, BackendPreference::Blit).unwrap_err();
        assert!(matches!(
            err,
            PrepError::CapabilityMismatch {
                backend: BackendKind::Blit,
                ..
            }
        ));

        let selector = BackendSelector::select(&caps, BackendPreference::Auto).unwrap();
        assert_eq!(selector.kind(), BackendKind::Compute);
        assert!(!selector.supports_blit());
    }

    #[test]
    fn test_auto_with_no_usable_backend_fails() {
        let caps = DeviceCapabilities {
            blit_supported: false,
            ..caps(false)
        };
        assert!(BackendSelector::select(&caps, BackendPreference::Auto).is_err());
    }
}
