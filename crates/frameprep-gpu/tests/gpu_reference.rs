//! GPU integration tests. Need a real wgpu adapter; each test returns early
//! (and says so on stderr) when none is available.
//!
//! Run with: `cargo test -p frameprep-gpu`

use std::sync::{Mutex, OnceLock, PoisonError};

use frameprep_core::{BackendPreference, CropRect, Dims, FrameImage, NormalizationProfile, PipelineConfig};
use frameprep_core::GeometryError;
use frameprep_gpu::{
    BackendKind, DeviceCapabilities, GpuContext, GpuSurface, ParameterBuffers, PrepError,
    TransformPipeline, download_surface,
};
use glam::{IVec2, UVec2, Vec2};

const IMAGENET: &str = r#"{
    "mean": [0.485, 0.456, 0.406],
    "std": [0.229, 0.224, 0.225],
    "scale": 1.0
}"#;

fn gpu_test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Create a test device, or `None` when the machine has no adapter.
fn create_test_context() -> Option<GpuContext> {
    match GpuContext::request(wgpu::PowerPreference::HighPerformance) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn pipeline(ctx: &GpuContext, backend: BackendPreference) -> TransformPipeline {
    TransformPipeline::initialize(
        ctx.clone(),
        Some(IMAGENET),
        PipelineConfig::default().with_backend(backend),
    )
    .expect("pipeline should initialize")
}

/// Backends the device can actually run.
fn available_backends(ctx: &GpuContext) -> Vec<BackendPreference> {
    let mut backends = Vec::new();
    if ctx.capabilities.supports_compute() {
        backends.push(BackendPreference::Compute);
    }
    if ctx.capabilities.supports_blit() {
        backends.push(BackendPreference::Blit);
    }
    backends
}

fn both_backends(ctx: &GpuContext) -> bool {
    let both = ctx.capabilities.supports_compute() && ctx.capabilities.supports_blit();
    if !both {
        eprintln!("skipping: device lacks compute or blit support");
    }
    both
}

/// Deterministic test pattern with distinct values in every channel.
fn create_test_pattern(dims: Dims) -> FrameImage {
    FrameImage::from_fn(dims, |x, y| {
        [
            x as f32 / (dims.width - 1) as f32,
            y as f32 / (dims.height - 1) as f32,
            ((x * 7 + y * 13) % 17) as f32 / 16.0,
            1.0,
        ]
    })
}

fn assert_close(label: &str, a: &FrameImage, b: &FrameImage, tolerance: f32) {
    let err = a.max_abs_diff(b);
    assert!(err < tolerance, "{label}: max error {err} >= {tolerance}");
}

#[test]
fn test_normalize_matches_cpu_and_inverts() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    let original = create_test_pattern(Dims::new(37, 21));
    for backend in available_backends(&ctx) {
        let pipeline = pipeline(&ctx, backend);
        let surface = GpuSurface::upload(&ctx, &original).unwrap();
        pipeline.normalize(&surface).unwrap();
        let mut result = download_surface(&ctx, &surface).unwrap();

        let mut expected = original.clone();
        expected.normalize(pipeline.profile());
        assert_close("normalize vs cpu", &result, &expected, 1e-4);

        result.denormalize(pipeline.profile());
        assert_close("normalize inverse", &result, &original, 1e-4);
    }
}

#[test]
fn test_normalize_backends_agree() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    if !both_backends(&ctx) {
        return;
    }

    let image = create_test_pattern(Dims::new(64, 48));
    let outputs: Vec<FrameImage> = [BackendPreference::Compute, BackendPreference::Blit]
        .into_iter()
        .map(|backend| {
            let pipeline = pipeline(&ctx, backend);
            let surface = GpuSurface::upload(&ctx, &image).unwrap();
            pipeline.normalize(&surface).unwrap();
            download_surface(&ctx, &surface).unwrap()
        })
        .collect();
    assert_close("compute vs blit normalize", &outputs[0], &outputs[1], 1e-5);
}

#[test]
fn test_crop_backends_agree() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    if !both_backends(&ctx) {
        return;
    }

    let image = create_test_pattern(Dims::new(80, 70));
    let source = GpuSurface::upload(&ctx, &image).unwrap();
    let size = Dims::square(50);

    let compute = pipeline(&ctx, BackendPreference::Compute);
    assert_eq!(compute.backend_kind(), BackendKind::Compute);
    let compute_dst = GpuSurface::create(&ctx, size, "compute_crop_dst").unwrap();
    compute
        .crop_compute(&source, &compute_dst, IVec2::new(10, 10), IVec2::new(50, 50))
        .unwrap();

    let blit = pipeline(&ctx, BackendPreference::Blit);
    let blit_dst = GpuSurface::create(&ctx, size, "blit_crop_dst").unwrap();
    blit.crop_blit(&source, &blit_dst, Vec2::new(10.0, 10.0), Vec2::new(50.0, 50.0))
        .unwrap();

    let from_compute = download_surface(&ctx, &compute_dst).unwrap();
    let from_blit = download_surface(&ctx, &blit_dst).unwrap();
    let expected = image
        .crop(&CropRect::new(UVec2::new(10, 10), UVec2::new(50, 50)))
        .unwrap();

    assert_close("compute crop vs cpu", &from_compute, &expected, 1e-6);
    assert_close("blit crop vs cpu", &from_blit, &expected, 1e-6);
    assert_close("compute vs blit crop", &from_compute, &from_blit, 1e-6);
}

#[test]
fn test_crop_blit_on_compute_pipeline() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    if !ctx.capabilities.supports_compute() {
        eprintln!("skipping: device has no compute support");
        return;
    }

    let image = create_test_pattern(Dims::new(32, 32));
    let source = GpuSurface::upload(&ctx, &image).unwrap();
    let dst = GpuSurface::create(&ctx, Dims::new(8, 4), "crop_dst").unwrap();
    let pipeline = pipeline(&ctx, BackendPreference::Compute);

    let result = pipeline.crop_blit(&source, &dst, Vec2::new(3.0, 5.0), Vec2::new(8.0, 4.0));
    if !ctx.capabilities.supports_blit() {
        assert!(matches!(
            result,
            Err(PrepError::CapabilityMismatch {
                backend: BackendKind::Blit,
                ..
            })
        ));
        return;
    }
    result.unwrap();
    let expected = image
        .crop(&CropRect::new(UVec2::new(3, 5), UVec2::new(8, 4)))
        .unwrap();
    assert_close("crop_blit", &download_surface(&ctx, &dst).unwrap(), &expected, 1e-6);
}

#[test]
fn test_crop_blit_fractional_offset_matches_snapped_rect() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    if !ctx.capabilities.supports_blit() {
        eprintln!("skipping: device cannot render into the surface format");
        return;
    }

    let image = create_test_pattern(Dims::new(10, 6));
    let source = GpuSurface::upload(&ctx, &image).unwrap();
    let pipeline = pipeline(&ctx, BackendPreference::Blit);

    // Offset floors to 3 and size rounds to 7, so the footprint ends exactly
    // at the right edge of the source.
    let rect = CropRect::new(UVec2::new(3, 0), UVec2::new(7, 6));
    let dst = GpuSurface::create(&ctx, rect.dims(), "crop_dst").unwrap();
    pipeline
        .crop_blit(&source, &dst, Vec2::new(3.7, 0.2), Vec2::new(7.4, 6.0))
        .unwrap();
    assert_close(
        "fractional crop_blit",
        &download_surface(&ctx, &dst).unwrap(),
        &image.crop(&rect).unwrap(),
        1e-6,
    );
}

#[test]
fn test_resize_matches_cpu_reference() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    let image = create_test_pattern(Dims::new(40, 30));
    let source = GpuSurface::upload(&ctx, &image).unwrap();
    for backend in available_backends(&ctx) {
        let pipeline = pipeline(&ctx, backend);
        for target in [Dims::new(17, 13), Dims::new(96, 72)] {
            let dst = GpuSurface::create(&ctx, target, "resize_dst").unwrap();
            pipeline.resize(&source, &dst).unwrap();
            let result = download_surface(&ctx, &dst).unwrap();
            assert_close(
                &format!("{} resize to {target}", pipeline.backend_kind()),
                &result,
                &image.resize(target),
                1e-4,
            );
        }
    }
}

#[test]
fn test_preprocess_chain() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    let image = create_test_pattern(Dims::new(320, 240));
    let source = GpuSurface::upload(&ctx, &image).unwrap();
    let pipeline = pipeline(&ctx, BackendPreference::Auto);

    let output = pipeline.preprocess(&source).unwrap();
    assert_eq!(output.dims(), Dims::square(224));

    let resized_dims = pipeline.resize_target_dims(image.dims());
    assert_eq!(resized_dims, Dims::new(299, 224));
    let rect = CropRect::centered(resized_dims, Dims::square(224)).unwrap();
    let mut expected = image.resize(resized_dims).crop(&rect).unwrap();
    expected.normalize(pipeline.profile());

    let result = download_surface(&ctx, &output).unwrap();
    assert_close("preprocess", &result, &expected, 1e-3);
}

#[test]
fn test_repeated_lifecycle_does_not_leak() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();
    let image = create_test_pattern(Dims::new(16, 16));

    let mut live_after_first = None;
    for cycle in 0..5 {
        let mut pipeline = pipeline(&ctx, BackendPreference::Auto);
        let expected_buffers = match pipeline.backend_kind() {
            BackendKind::Compute => 2,
            BackendKind::Blit => 0,
        };
        assert_eq!(tracker.live_buffers(), expected_buffers, "cycle {cycle}");

        let surface = GpuSurface::upload(&ctx, &image).unwrap();
        pipeline.normalize(&surface).unwrap();
        pipeline.shutdown();
        pipeline.shutdown();

        let live = (tracker.live_buffers(), tracker.live_textures());
        assert_eq!(live, (0, 0), "cycle {cycle} leaked");
        live_after_first.get_or_insert(live);
        assert_eq!(Some(live), live_after_first);
    }
}

#[test]
fn test_drop_releases_resources() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();
    {
        let pipeline = pipeline(&ctx, BackendPreference::Auto);
        let surface = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(8, 8))).unwrap();
        pipeline.normalize(&surface).unwrap();
        assert_eq!(pipeline.scratch_pool().idle_count(), 1);
    }
    assert_eq!(tracker.live_buffers(), 0);
    assert_eq!(tracker.live_textures(), 0);
}

#[test]
fn test_scratch_surfaces_are_reused() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();
    let pipeline = pipeline(&ctx, BackendPreference::Auto);
    let surface = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(24, 24))).unwrap();

    pipeline.normalize(&surface).unwrap();
    let created = tracker.textures_created();
    pipeline.normalize(&surface).unwrap();
    pipeline.normalize(&surface).unwrap();
    assert_eq!(tracker.textures_created(), created);
}

#[test]
fn test_out_of_bounds_crop_rejected_without_allocating() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();
    let pipeline = pipeline(&ctx, BackendPreference::Auto);

    let source = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(32, 32))).unwrap();
    let dst = GpuSurface::create(&ctx, Dims::square(16), "crop_dst").unwrap();
    let before = tracker.textures_created();

    let rect = CropRect::new(UVec2::new(20, 0), UVec2::new(16, 16));
    assert!(matches!(
        pipeline.crop(&source, &dst, rect),
        Err(PrepError::Geometry(_))
    ));
    assert!(matches!(
        pipeline.crop_blit(&source, &dst, Vec2::new(-1.0, 0.0), Vec2::new(16.0, 16.0)),
        Err(PrepError::Geometry(_))
    ));
    let wrong_dst = GpuSurface::create(&ctx, Dims::new(16, 8), "wrong_dst").unwrap();
    assert!(matches!(
        pipeline.crop(&source, &wrong_dst, CropRect::new(UVec2::ZERO, UVec2::new(16, 16))),
        Err(PrepError::Geometry(_))
    ));
    assert_eq!(tracker.textures_created(), before);
}

#[test]
fn test_crop_compute_on_blit_pipeline_is_capability_mismatch() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    if !ctx.capabilities.supports_blit() {
        eprintln!("skipping: device cannot render into the surface format");
        return;
    }
    let pipeline = pipeline(&ctx, BackendPreference::Blit);

    let source = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(16, 16))).unwrap();
    let dst = GpuSurface::create(&ctx, Dims::square(4), "crop_dst").unwrap();
    let err = pipeline
        .crop_compute(&source, &dst, IVec2::ZERO, IVec2::new(4, 4))
        .unwrap_err();
    assert!(matches!(
        err,
        PrepError::CapabilityMismatch {
            backend: BackendKind::Compute,
            ..
        }
    ));
}

#[test]
fn test_device_without_compute_uses_blit() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let caps = DeviceCapabilities {
        compute_shaders: false,
        ..ctx.capabilities.clone()
    };
    let no_compute = GpuContext::with_capabilities(ctx.device.clone(), ctx.queue.clone(), caps);

    let forced = TransformPipeline::initialize(
        no_compute.clone(),
        Some(IMAGENET),
        PipelineConfig::default().with_backend(BackendPreference::Compute),
    );
    assert!(matches!(forced, Err(PrepError::CapabilityMismatch { .. })));

    if !ctx.capabilities.supports_blit() {
        eprintln!("skipping blit half: device cannot render into the surface format");
        return;
    }
    let pipeline = pipeline(&no_compute, BackendPreference::Auto);
    assert_eq!(pipeline.backend_kind(), BackendKind::Blit);
    assert!(!pipeline.supports_compute());
    assert_eq!(no_compute.tracker().live_buffers(), 0);
}

#[test]
fn test_blit_without_renderable_format_fails_cleanly() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    // On the real device, a blit pipeline either builds or reports an error;
    // it never panics through the uncaptured-error handler.
    let real = TransformPipeline::initialize(
        ctx.clone(),
        Some(IMAGENET),
        PipelineConfig::default().with_backend(BackendPreference::Blit),
    );
    assert_eq!(real.is_ok(), ctx.capabilities.supports_blit());

    let caps = DeviceCapabilities {
        blit_supported: false,
        ..ctx.capabilities.clone()
    };
    let no_blit = GpuContext::with_capabilities(ctx.device.clone(), ctx.queue.clone(), caps);
    let forced = TransformPipeline::initialize(
        no_blit.clone(),
        Some(IMAGENET),
        PipelineConfig::default().with_backend(BackendPreference::Blit),
    );
    assert!(matches!(
        forced,
        Err(PrepError::CapabilityMismatch {
            backend: BackendKind::Blit,
            ..
        })
    ));

    let caps = DeviceCapabilities {
        compute_shaders: false,
        blit_supported: false,
        ..ctx.capabilities.clone()
    };
    let neither = GpuContext::with_capabilities(ctx.device.clone(), ctx.queue.clone(), caps);
    assert!(TransformPipeline::initialize(neither, None, PipelineConfig::default()).is_err());
}

#[test]
fn test_crop_larger_than_resize_rejected_at_initialize() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();

    let config = PipelineConfig {
        target_short_side: 128,
        ..PipelineConfig::default()
    };
    let result = TransformPipeline::initialize(ctx.clone(), Some(IMAGENET), config.clone());
    assert!(matches!(
        result,
        Err(PrepError::Geometry(GeometryError::CropExceedsResize {
            crop_size: 224,
            short_side: 128
        }))
    ));
    assert_eq!(tracker.live_buffers(), 0);

    let pipeline = TransformPipeline::initialize(
        ctx.clone(),
        Some(IMAGENET),
        PipelineConfig {
            crop_size: 112,
            ..config
        },
    )
    .unwrap();
    let source = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(320, 240))).unwrap();
    let output = pipeline.preprocess(&source).unwrap();
    assert_eq!(output.dims(), Dims::square(112));
}

#[test]
fn test_parameter_buffers_release_once() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let tracker = ctx.tracker().clone();

    let profile = NormalizationProfile::parse(IMAGENET).unwrap();
    let mut buffers = ParameterBuffers::initialize(&ctx, &profile).unwrap();
    assert!(!buffers.is_released());
    assert_eq!(tracker.live_buffers(), 2);

    buffers.release();
    assert!(buffers.is_released());
    assert_eq!(tracker.live_buffers(), 0);

    buffers.release();
    drop(buffers);
    assert_eq!(tracker.live_buffers(), 0);
    assert_eq!(tracker.buffers_created(), 2);
}

#[test]
fn test_malformed_config_yields_identity_pipeline() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    let pipeline =
        TransformPipeline::initialize(ctx.clone(), Some("{not json"), PipelineConfig::default())
            .expect("malformed config must not fail initialization");
    assert_eq!(*pipeline.profile(), NormalizationProfile::IDENTITY);

    let image = create_test_pattern(Dims::new(12, 9));
    let surface = GpuSurface::upload(&ctx, &image).unwrap();
    pipeline.normalize(&surface).unwrap();
    assert_close("identity normalize", &download_surface(&ctx, &surface).unwrap(), &image, 1e-6);
}

#[test]
fn test_operations_after_shutdown_fail() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };
    let mut pipeline = pipeline(&ctx, BackendPreference::Auto);
    pipeline.shutdown();
    assert!(pipeline.is_shut_down());

    let surface = GpuSurface::upload(&ctx, &create_test_pattern(Dims::new(8, 8))).unwrap();
    assert!(matches!(pipeline.normalize(&surface), Err(PrepError::ShutDown)));
    assert!(matches!(pipeline.preprocess(&surface), Err(PrepError::ShutDown)));
}

#[test]
fn test_host_texture_adoption() {
    let _lock = gpu_test_lock().lock().unwrap_or_else(PoisonError::into_inner);
    let Some(ctx) = create_test_context() else { return };

    let descriptor = |format, usage| wgpu::TextureDescriptor {
        label: Some("host_texture"),
        size: wgpu::Extent3d {
            width: 20,
            height: 10,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    };

    let wrong_format = ctx.device.create_texture(&descriptor(
        wgpu::TextureFormat::Rgba8Unorm,
        frameprep_gpu::buffers::SURFACE_USAGE,
    ));
    assert!(matches!(
        GpuSurface::from_texture(wrong_format),
        Err(PrepError::SurfaceMismatch { .. })
    ));

    let missing_usage = ctx.device.create_texture(&descriptor(
        frameprep_gpu::SURFACE_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING,
    ));
    assert!(GpuSurface::from_texture(missing_usage).is_err());

    let texture = ctx.device.create_texture(&descriptor(
        frameprep_gpu::SURFACE_FORMAT,
        frameprep_gpu::buffers::SURFACE_USAGE,
    ));
    let surface = GpuSurface::from_texture(texture).unwrap();
    assert_eq!(surface.dims(), Dims::new(20, 10));

    let image = create_test_pattern(surface.dims());
    surface.write(&ctx, &image).unwrap();
    let pipeline = pipeline(&ctx, BackendPreference::Auto);
    pipeline.normalize(&surface).unwrap();
    let mut expected = image;
    expected.normalize(pipeline.profile());
    assert_close("adopted surface", &download_surface(&ctx, &surface).unwrap(), &expected, 1e-4);
}
