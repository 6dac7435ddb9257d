//! frameprep GPU — wgpu transform pipeline for model-input frames.
//!
//! Normalize, resize and crop run either as compute dispatches or, on
//! devices without compute support, as fragment-shader blits. The choice is
//! made once per [`TransformPipeline`]; both paths produce the same pixels.

pub mod backend;
pub mod blit;
pub mod buffers;
pub mod capability;
pub mod compute;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod readback;
pub mod scratch;
pub mod uniforms;

pub use buffers::{GpuSurface, ParameterBuffers, SURFACE_FORMAT};
pub use capability::{BackendKind, BackendSelector, DeviceCapabilities};
pub use context::{AllocationTracker, GpuContext};
pub use error::PrepError;
pub use frameprep_core::compute_target_dims as resize_target_dims;
pub use pipeline::TransformPipeline;
pub use readback::download_surface;
