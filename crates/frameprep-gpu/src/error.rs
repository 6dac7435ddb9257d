use frameprep_core::{Dims, GeometryError};
use thiserror::Error;

use crate::capability::BackendKind;

/// Errors surfaced by GPU pipeline setup and transforms.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("no GPU adapter available: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("failed to allocate {label}: {message}")]
    ResourceAllocation { label: &'static str, message: String },
    #[error("`{operation}` requires the {backend} backend, which is not available here")]
    CapabilityMismatch {
        operation: &'static str,
        backend: BackendKind,
    },
    #[error("failed to build {label}: {message}")]
    PipelineCreation { label: &'static str, message: String },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("surface {label} is unusable: {reason}")]
    SurfaceMismatch { label: &'static str, reason: String },
    #[error("pipeline has been shut down")]
    ShutDown,
    #[error("readback of {dims} surface failed: {message}")]
    Readback { dims: Dims, message: String },
}
