//! The capability interface both execution strategies implement.

use std::num::NonZeroU64;

use frameprep_core::{CropRect, NormalizationProfile};

use crate::blit::BlitBackend;
use crate::buffers::{GpuSurface, extent};
use crate::capability::BackendKind;
use crate::compute::ComputeBackend;
use crate::context::GpuContext;
use crate::error::PrepError;
use crate::scratch::ScratchPool;

/// Operations every backend provides.
///
/// Callers validate geometry before calling in; backends assume the crop
/// rectangle fits `image` and `destination` matches the output size.
pub trait TransformBackend {
    fn kind(&self) -> BackendKind;

    /// Normalize `image` in place.
    fn normalize(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
    ) -> Result<(), PrepError>;

    /// Write `rect` of `image` into `destination`.
    fn crop(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
        destination: &GpuSurface,
        rect: CropRect,
    ) -> Result<(), PrepError>;

    /// Bilinearly resample `image` to the size of `destination`.
    fn resize(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
        destination: &GpuSurface,
    ) -> Result<(), PrepError>;
}

/// Backend chosen at initialization.
pub enum Backend {
    Compute(ComputeBackend),
    Blit(BlitBackend),
}

impl Backend {
    pub fn create(
        ctx: &GpuContext,
        kind: BackendKind,
        profile: &NormalizationProfile,
    ) -> Result<Self, PrepError> {
        Ok(match kind {
            BackendKind::Compute => Backend::Compute(ComputeBackend::new(ctx, profile)?),
            BackendKind::Blit => Backend::Blit(BlitBackend::new(ctx, profile)?),
        })
    }

    pub fn as_transform(&self) -> &dyn TransformBackend {
        match self {
            Backend::Compute(backend) => backend,
            Backend::Blit(backend) => backend,
        }
    }

    /// Free backend-owned device buffers ahead of drop.
    pub fn release(&mut self) {
        if let Backend::Compute(backend) = self {
            backend.release();
        }
    }
}

/// Record a full-surface copy from a scratch surface into its target.
pub(crate) fn copy_back(encoder: &mut wgpu::CommandEncoder, from: &GpuSurface, to: &GpuSurface) {
    encoder.copy_texture_to_texture(
        wgpu::TexelCopyTextureInfo {
            texture: from.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyTextureInfo {
            texture: to.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        extent(to.dims()),
    );
}

// ── Layout helpers ──────────────────────────────────────────────────

pub(crate) fn source_texture_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: crate::buffers::SURFACE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

pub(crate) fn storage_ro_entry(binding: u32, min_size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(min_size),
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    min_size: u64,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(min_size),
        },
        count: None,
    }
}

pub(crate) fn uniform_buffer(device: &wgpu::Device, label: &'static str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
