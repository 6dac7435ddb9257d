//! GPU buffer and texture handles for the transform pipeline.

use frameprep_core::{Dims, FrameImage, NormalizationProfile};
use wgpu::util::DeviceExt;

use crate::context::{AllocationTracker, GpuContext};
use crate::error::PrepError;

/// Pixel format of every surface the pipeline reads or writes.
///
/// Rgba32Float keeps normalized values (negative, above one) exact and is
/// storage-writable and renderable on every wgpu backend.
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// Bytes per `SURFACE_FORMAT` texel.
pub const BYTES_PER_PIXEL: u32 = 16;

/// Usage a caller-owned surface needs: sampled as a source, copied into as
/// an in-place destination, copied out of for readback.
pub const SURFACE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A caller-owned 2D image on the GPU.
///
/// The pipeline borrows surfaces for one operation at a time and never keeps
/// them.
#[derive(Debug)]
pub struct GpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dims: Dims,
}

impl GpuSurface {
    /// Allocate an uninitialized surface.
    pub fn create(ctx: &GpuContext, dims: Dims, label: &'static str) -> Result<Self, PrepError> {
        check_extent(ctx, dims, label)?;
        let texture = ctx.allocate(label, |device| {
            device.create_texture(&surface_descriptor(label, dims, SURFACE_USAGE))
        })?;
        Ok(Self::wrap(texture, dims))
    }

    /// Allocate a surface and fill it from a CPU frame.
    pub fn upload(ctx: &GpuContext, image: &FrameImage) -> Result<Self, PrepError> {
        let surface = Self::create(ctx, image.dims(), "frameprep_surface_upload")?;
        surface.write(ctx, image)?;
        Ok(surface)
    }

    /// Adopt a texture created by the host.
    ///
    /// The texture must be a single-sample 2D `Rgba32Float` texture with
    /// [`SURFACE_USAGE`].
    pub fn from_texture(texture: wgpu::Texture) -> Result<Self, PrepError> {
        if texture.format() != SURFACE_FORMAT {
            return Err(PrepError::SurfaceMismatch {
                label: "host texture",
                reason: format!("format {:?}, expected {SURFACE_FORMAT:?}", texture.format()),
            });
        }
        if texture.dimension() != wgpu::TextureDimension::D2 || texture.sample_count() != 1 {
            return Err(PrepError::SurfaceMismatch {
                label: "host texture",
                reason: "must be a single-sample 2D texture".to_string(),
            });
        }
        if !texture.usage().contains(SURFACE_USAGE) {
            return Err(PrepError::SurfaceMismatch {
                label: "host texture",
                reason: format!("usage {:?} lacks {SURFACE_USAGE:?}", texture.usage()),
            });
        }
        let dims = Dims::new(texture.width(), texture.height());
        Ok(Self::wrap(texture, dims))
    }

    /// Overwrite the surface contents from a CPU frame of the same size.
    pub fn write(&self, ctx: &GpuContext, image: &FrameImage) -> Result<(), PrepError> {
        frameprep_core::geometry::expect_dims(self.dims, image.dims())?;
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&image.pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width * BYTES_PER_PIXEL),
                rows_per_image: Some(image.height),
            },
            extent(self.dims),
        );
        Ok(())
    }

    pub(crate) fn wrap(texture: wgpu::Texture, dims: Dims) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            dims,
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Device copies of the profile's mean and std, read by the normalize kernel.
///
/// Only the compute backend allocates these; the blit backend carries the
/// profile in its uniform instead. Released exactly once, either through
/// [`ParameterBuffers::release`] or on drop.
pub struct ParameterBuffers {
    mean: Option<wgpu::Buffer>,
    std: Option<wgpu::Buffer>,
    tracker: AllocationTracker,
}

impl ParameterBuffers {
    /// Byte size of each buffer: three `f32`s.
    pub const SIZE: u64 = 3 * std::mem::size_of::<f32>() as u64;

    /// Upload `profile.mean` and `profile.std`.
    pub fn initialize(ctx: &GpuContext, profile: &NormalizationProfile) -> Result<Self, PrepError> {
        let mean = ctx.allocate("frameprep_mean_buffer", |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("frameprep_mean_buffer"),
                contents: bytemuck::cast_slice(&profile.mean),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })?;
        ctx.tracker().buffer_created();

        // Build the guard before the second allocation so a failure there
        // still frees the mean buffer.
        let mut buffers = Self {
            mean: Some(mean),
            std: None,
            tracker: ctx.tracker().clone(),
        };

        let std = ctx.allocate("frameprep_std_buffer", |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("frameprep_std_buffer"),
                contents: bytemuck::cast_slice(&profile.std),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })?;
        ctx.tracker().buffer_created();
        buffers.std = Some(std);

        tracing::debug!("uploaded normalization parameter buffers");
        Ok(buffers)
    }

    /// Free both buffers. Calling again is a no-op.
    pub fn release(&mut self) {
        for buffer in [self.mean.take(), self.std.take()].into_iter().flatten() {
            buffer.destroy();
            self.tracker.buffer_released();
        }
    }

    pub fn is_released(&self) -> bool {
        self.mean.is_none() && self.std.is_none()
    }

    pub(crate) fn bindings(&self) -> Result<(&wgpu::Buffer, &wgpu::Buffer), PrepError> {
        match (&self.mean, &self.std) {
            (Some(mean), Some(std)) => Ok((mean, std)),
            _ => Err(PrepError::ShutDown),
        }
    }
}

impl Drop for ParameterBuffers {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) fn surface_descriptor(
    label: &'static str,
    dims: Dims,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureDescriptor<'static> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(dims),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage,
        view_formats: &[],
    }
}

pub(crate) fn extent(dims: Dims) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: dims.width,
        height: dims.height,
        depth_or_array_layers: 1,
    }
}

pub(crate) fn check_extent(ctx: &GpuContext, dims: Dims, label: &'static str) -> Result<(), PrepError> {
    if dims.is_empty() {
        return Err(PrepError::SurfaceMismatch {
            label,
            reason: format!("zero-sized surface {dims}"),
        });
    }
    let max = ctx.capabilities.max_texture_dimension_2d;
    if dims.width > max || dims.height > max {
        return Err(PrepError::ResourceAllocation {
            label,
            message: format!("{dims} exceeds device limit {max}"),
        });
    }
    Ok(())
}
