//! GPU-to-CPU readback of surfaces.

use std::sync::mpsc;

use frameprep_core::{Dims, FrameImage};

use crate::buffers::{BYTES_PER_PIXEL, GpuSurface, extent};
use crate::context::GpuContext;
use crate::error::PrepError;

/// Row pitch for texture-to-buffer copies, padded to wgpu's 256-byte rule.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Download `surface` into a [`FrameImage`]. Blocks until the GPU is done.
pub fn download_surface(ctx: &GpuContext, surface: &GpuSurface) -> Result<FrameImage, PrepError> {
    let dims = surface.dims();
    let padded_row = padded_bytes_per_row(dims.width);
    let size = u64::from(padded_row) * u64::from(dims.height);

    let staging = ctx.allocate("frameprep_readback_staging", |device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frameprep_readback_staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    })?;

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frameprep_readback_encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: surface.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(dims.height),
            },
        },
        extent(dims),
    );
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = mpsc::channel();
    staging
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|err| readback_error(dims, err))?;
    rx.recv()
        .map_err(|err| readback_error(dims, err))?
        .map_err(|err| readback_error(dims, err))?;

    let pixels = {
        let data = staging.slice(..).get_mapped_range();
        unpack_rows(&data, dims, padded_row)
    };
    staging.unmap();
    staging.destroy();

    Ok(FrameImage {
        width: dims.width,
        height: dims.height,
        pixels,
    })
}

fn unpack_rows(data: &[u8], dims: Dims, padded_row: u32) -> Vec<[f32; 4]> {
    let row_bytes = (dims.width * BYTES_PER_PIXEL) as usize;
    let mut pixels = Vec::with_capacity(dims.pixel_count());
    for row in data.chunks_exact(padded_row as usize).take(dims.height as usize) {
        pixels.extend(
            row[..row_bytes]
                .chunks_exact(BYTES_PER_PIXEL as usize)
                .map(bytemuck::pod_read_unaligned::<[f32; 4]>),
        );
    }
    pixels
}

fn readback_error(dims: Dims, err: impl std::fmt::Display) -> PrepError {
    PrepError::Readback {
        dims,
        message: err.to_string(),
    }
}
