//! Compute-dispatch backend: one kernel per operation, 8×8 tiles, writing
//! into a write-enabled scratch surface that is then copied back.

use frameprep_core::{CropRect, Dims, NormalizationProfile};
use wgpu::util::DeviceExt;

use crate::backend::{
    TransformBackend, copy_back, source_texture_entry, storage_ro_entry, storage_texture_entry,
    uniform_buffer, uniform_entry,
};
use crate::buffers::{GpuSurface, ParameterBuffers};
use crate::capability::{BackendKind, WORKGROUP_SIZE};
use crate::context::GpuContext;
use crate::error::PrepError;
use crate::scratch::{ScratchAccess, ScratchPool};
use crate::uniforms::{CropParamsGpu, ResizeParamsGpu, ScaleParamsGpu};

/// Compute pipeline plus the bind group layout it was built with.
struct Kernel {
    name: &'static str,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        name: &'static str,
        source: &'static str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(name),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            name,
            pipeline,
            layout,
        }
    }
}

/// Runs transforms as compute dispatches. Owns the parameter buffers.
pub struct ComputeBackend {
    normalize: Kernel,
    crop: Kernel,
    resize: Kernel,
    params: ParameterBuffers,
    scale_buffer: wgpu::Buffer,
    crop_buffer: wgpu::Buffer,
    resize_buffer: wgpu::Buffer,
}

impl ComputeBackend {
    /// Compile the kernels and upload `profile`.
    pub fn new(ctx: &GpuContext, profile: &NormalizationProfile) -> Result<Self, PrepError> {
        let params = ParameterBuffers::initialize(ctx, profile)?;
        let device = &ctx.device;

        let (normalize, crop, resize) = ctx.validated("frameprep_compute_kernels", |device| {
            let normalize = Kernel::new(
                device,
                "NormalizeImage",
                include_str!("../shaders/compute/normalize.wgsl"),
                &[
                    source_texture_entry(0, wgpu::ShaderStages::COMPUTE),
                    storage_texture_entry(1),
                    storage_ro_entry(2, ParameterBuffers::SIZE),
                    storage_ro_entry(3, ParameterBuffers::SIZE),
                    uniform_entry(4, wgpu::ShaderStages::COMPUTE, 16),
                ],
            );

            let copy_entries = [
                source_texture_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_texture_entry(1),
                uniform_entry(2, wgpu::ShaderStages::COMPUTE, 16),
            ];
            let crop = Kernel::new(
                device,
                "Crop",
                include_str!("../shaders/compute/crop.wgsl"),
                &copy_entries,
            );
            let resize = Kernel::new(
                device,
                "ResizeImage",
                concat!(
                    include_str!("../shaders/sampling.wgsl"),
                    include_str!("../shaders/compute/resize.wgsl"),
                ),
                &copy_entries,
            );
            (normalize, crop, resize)
        })?;

        // The profile never changes, so the scale is written once.
        let scale_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frameprep_scale_uniform"),
            contents: bytemuck::bytes_of(&ScaleParamsGpu::new(profile.scale)),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Ok(Self {
            normalize,
            crop,
            resize,
            params,
            scale_buffer,
            crop_buffer: uniform_buffer(device, "frameprep_crop_uniform", 16),
            resize_buffer: uniform_buffer(device, "frameprep_resize_uniform", 16),
        })
    }

    /// Release the parameter buffers. Later dispatches fail with
    /// [`PrepError::ShutDown`].
    pub fn release(&mut self) {
        self.params.release();
    }

    /// Bind `source` + a fresh scratch surface (+ `extra` bindings from 2 up),
    /// dispatch over `grid`, copy the scratch into `target`, submit.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        kernel: &Kernel,
        source: &GpuSurface,
        target: &GpuSurface,
        grid: Dims,
        extra: &[wgpu::BindGroupEntry<'_>],
    ) -> Result<(), PrepError> {
        let scratch = pool.acquire(ctx, grid, ScratchAccess::WriteEnabled)?;

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source.view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(scratch.surface().view()),
            },
        ];
        entries.extend_from_slice(extra);

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.name),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y) = workgroup_count(grid);
            pass.dispatch_workgroups(x, y, 1);
        }
        copy_back(&mut encoder, scratch.surface(), target);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        tracing::debug!(kernel = kernel.name, %grid, "dispatched compute kernel");
        Ok(())
    }
}

impl TransformBackend for ComputeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Compute
    }

    fn normalize(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
    ) -> Result<(), PrepError> {
        let (mean, std) = self.params.bindings()?;
        self.run(
            ctx,
            pool,
            &self.normalize,
            image,
            image,
            image.dims(),
            &[
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: mean.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: std.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.scale_buffer.as_entire_binding(),
                },
            ],
        )
    }

    fn crop(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
        destination: &GpuSurface,
        rect: CropRect,
    ) -> Result<(), PrepError> {
        ctx.queue.write_buffer(
            &self.crop_buffer,
            0,
            bytemuck::bytes_of(&CropParamsGpu::from(rect)),
        );
        self.run(
            ctx,
            pool,
            &self.crop,
            image,
            destination,
            destination.dims(),
            &[wgpu::BindGroupEntry {
                binding: 2,
                resource: self.crop_buffer.as_entire_binding(),
            }],
        )
    }

    fn resize(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
        destination: &GpuSurface,
    ) -> Result<(), PrepError> {
        ctx.queue.write_buffer(
            &self.resize_buffer,
            0,
            bytemuck::bytes_of(&ResizeParamsGpu::new(image.dims(), destination.dims())),
        );
        self.run(
            ctx,
            pool,
            &self.resize,
            image,
            destination,
            destination.dims(),
            &[wgpu::BindGroupEntry {
                binding: 2,
                resource: self.resize_buffer.as_entire_binding(),
            }],
        )
    }
}

/// Workgroups needed to cover `grid` with 8×8 tiles.
pub fn workgroup_count(grid: Dims) -> (u32, u32) {
    (
        grid.width.div_ceil(WORKGROUP_SIZE),
        grid.height.div_ceil(WORKGROUP_SIZE),
    )
}
