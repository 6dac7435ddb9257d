//! Fragment-shader fallback backend.
//!
//! Each operation draws a full-screen triangle through a parameterized
//! fragment shader into a render-target scratch surface, then copies the
//! scratch into the caller's surface. Nothing here needs storage textures,
//! so it runs on devices without compute support, provided they can render
//! into `Rgba32Float`.

use frameprep_core::{CropRect, Dims, NormalizationProfile};
use wgpu::util::DeviceExt;

use crate::backend::{TransformBackend, copy_back, source_texture_entry, uniform_buffer, uniform_entry};
use crate::buffers::{GpuSurface, SURFACE_FORMAT};
use crate::capability::BackendKind;
use crate::context::GpuContext;
use crate::error::PrepError;
use crate::scratch::{ScratchAccess, ScratchPool};
use crate::uniforms::{BlitCropParamsGpu, ResizeParamsGpu};

const FULLSCREEN_WGSL: &str = include_str!("../shaders/blit/fullscreen.wgsl");

/// Runs transforms as full-screen draws.
pub struct BlitBackend {
    layout: wgpu::BindGroupLayout,
    normalize: wgpu::RenderPipeline,
    crop: wgpu::RenderPipeline,
    resize: wgpu::RenderPipeline,
    normalize_params: wgpu::Buffer,
    crop_params: wgpu::Buffer,
    resize_params: wgpu::Buffer,
}

impl BlitBackend {
    /// Build the blit pipelines and push `profile` into the normalize
    /// uniform.
    ///
    /// Fails with [`PrepError::CapabilityMismatch`] when the device cannot
    /// render into [`SURFACE_FORMAT`], and with
    /// [`PrepError::PipelineCreation`] when wgpu rejects a pipeline.
    pub fn new(ctx: &GpuContext, profile: &NormalizationProfile) -> Result<Self, PrepError> {
        if !ctx.capabilities.supports_blit() {
            return Err(PrepError::CapabilityMismatch {
                operation: "blit",
                backend: BackendKind::Blit,
            });
        }
        ctx.validated("frameprep_blit_pipelines", |device| Self::build(device, profile))
    }

    fn build(device: &wgpu::Device, profile: &NormalizationProfile) -> Self {
        // binding 0: source texture, binding 1: op parameters. Parameter
        // structs differ in size per op, so the size is checked at draw time.
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frameprep_blit_layout"),
            entries: &[
                source_texture_entry(0, wgpu::ShaderStages::FRAGMENT),
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT, 0),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frameprep_blit_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let normalize = create_blit_pipeline(
            device,
            &pipeline_layout,
            "frameprep_blit_normalize",
            &[FULLSCREEN_WGSL, include_str!("../shaders/blit/normalize.wgsl")],
            "fs_normalize",
        );
        let crop = create_blit_pipeline(
            device,
            &pipeline_layout,
            "frameprep_blit_crop",
            &[FULLSCREEN_WGSL, include_str!("../shaders/blit/crop.wgsl")],
            "fs_crop",
        );
        let resize = create_blit_pipeline(
            device,
            &pipeline_layout,
            "frameprep_blit_resize",
            &[
                FULLSCREEN_WGSL,
                include_str!("../shaders/sampling.wgsl"),
                include_str!("../shaders/blit/resize.wgsl"),
            ],
            "fs_resize",
        );

        let normalize_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frameprep_blit_normalize_uniform"),
            contents: bytemuck::bytes_of(&profile.to_gpu()),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        Self {
            layout,
            normalize,
            crop,
            resize,
            normalize_params,
            crop_params: uniform_buffer(
                device,
                "frameprep_blit_crop_uniform",
                std::mem::size_of::<BlitCropParamsGpu>() as u64,
            ),
            resize_params: uniform_buffer(
                device,
                "frameprep_blit_resize_uniform",
                std::mem::size_of::<ResizeParamsGpu>() as u64,
            ),
        }
    }

    /// Draw `source` through `pipeline` into a scratch surface sized like
    /// `target`, copy it into `target`, submit.
    #[allow(clippy::too_many_arguments)]
    fn draw(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        pipeline: &wgpu::RenderPipeline,
        params: &wgpu::Buffer,
        source: &GpuSurface,
        target: &GpuSurface,
        label: &'static str,
    ) -> Result<(), PrepError> {
        let out_dims: Dims = target.dims();
        let scratch = pool.acquire(ctx, out_dims, ScratchAccess::RenderTarget)?;

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: scratch.surface().view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        copy_back(&mut encoder, scratch.surface(), target);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        tracing::debug!(pass = label, dims = %out_dims, "blitted");
        Ok(())
    }
}

impl TransformBackend for BlitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Blit
    }

    fn normalize(
        &self,
        ctx: &GpuContext,
        pool: &ScratchPool,
        image: &GpuSurface,
    ) -> Result<(), PrepError> {
        self.draw(
            ctx,
            pool,
            &self.normalize,
            &self.normalize_params,
            image,
            image,
            "frameprep_blit_normalize",
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
            &self.crop_params,
            0,
            bytemuck::bytes_of(&BlitCropParamsGpu::from(rect)),
        );
        self.draw(
            ctx,
            pool,
            &self.crop,
            &self.crop_params,
            image,
            destination,
            "frameprep_blit_crop",
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
            &self.resize_params,
            0,
            bytemuck::bytes_of(&ResizeParamsGpu::new(image.dims(), destination.dims())),
        );
        self.draw(
            ctx,
            pool,
            &self.resize,
            &self.resize_params,
            image,
            destination,
            "frameprep_blit_resize",
        )
    }
}

fn create_blit_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    label: &'static str,
    sources: &[&str],
    fragment_entry: &'static str,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(sources.concat().into()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some(fragment_entry),
            // Float32 targets are not blendable without an extra feature.
            targets: &[Some(wgpu::ColorTargetState {
                format: SURFACE_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}
