//! Top-level transform pipeline: lifecycle plus normalize/resize/crop.

use std::sync::OnceLock;

use frameprep_core::geometry::expect_dims;
use frameprep_core::{CropRect, Dims, NormalizationProfile, PipelineConfig, compute_target_dims};
use glam::{IVec2, Vec2};

use crate::backend::{Backend, TransformBackend};
use crate::blit::BlitBackend;
use crate::buffers::GpuSurface;
use crate::capability::{BackendKind, BackendSelector};
use crate::context::GpuContext;
use crate::error::PrepError;
use crate::scratch::ScratchPool;

/// Owns everything one pipeline instance needs: profile, backend choice,
/// parameter buffers (inside the compute backend) and the scratch pool.
///
/// Operations borrow caller surfaces for the duration of one call and
/// return once the GPU work is submitted; queue ordering makes the
/// copy-back land after the pass that produced it.
pub struct TransformPipeline {
    ctx: GpuContext,
    config: PipelineConfig,
    profile: NormalizationProfile,
    selector: BackendSelector,
    backend: Option<Backend>,
    /// Built on first `crop_blit` call when the active backend is compute.
    blit_fallback: OnceLock<BlitBackend>,
    scratch: ScratchPool,
}

impl TransformPipeline {
    /// Load the profile, select the backend, and allocate its resources.
    ///
    /// `config_text` is the normalization JSON blob; absent or malformed
    /// text degrades to the identity profile. A `config` whose center crop
    /// cannot fit the resized frame, a backend the device cannot run, and
    /// allocation or pipeline failures are returned as errors.
    pub fn initialize(
        ctx: GpuContext,
        config_text: Option<&str>,
        config: PipelineConfig,
    ) -> Result<Self, PrepError> {
        config.validate()?;
        let profile = NormalizationProfile::load(config_text);
        let selector = BackendSelector::select(&ctx.capabilities, config.backend)?;
        let backend = Backend::create(&ctx, selector.kind(), &profile)?;
        let scratch = ScratchPool::new(ctx.tracker().clone(), config.scratch_capacity);

        tracing::info!(
            backend = %backend.as_transform().kind(),
            supports_compute = selector.supports_compute(),
            identity_profile = profile.is_identity(),
            "transform pipeline initialized"
        );

        Ok(Self {
            ctx,
            config,
            profile,
            selector,
            backend: Some(backend),
            blit_fallback: OnceLock::new(),
            scratch,
        })
    }

    /// Release parameter buffers and pooled scratch surfaces.
    ///
    /// Idempotent; also runs on drop. Operations after shutdown return
    /// [`PrepError::ShutDown`].
    pub fn shutdown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        backend.release();
        drop(backend);
        self.blit_fallback.take();
        self.scratch.drain();
        tracing::info!("transform pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.backend.is_none()
    }

    pub fn profile(&self) -> &NormalizationProfile {
        &self.profile
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.selector.kind()
    }

    /// Device capability captured at initialization.
    pub fn supports_compute(&self) -> bool {
        self.selector.supports_compute()
    }

    /// Whether `crop_blit` can run on this device.
    pub fn supports_blit(&self) -> bool {
        self.selector.supports_blit()
    }

    pub fn scratch_pool(&self) -> &ScratchPool {
        &self.scratch
    }

    fn active(&self) -> Result<&dyn TransformBackend, PrepError> {
        self.backend
            .as_ref()
            .map(Backend::as_transform)
            .ok_or(PrepError::ShutDown)
    }

    /// Normalize `image` in place: `(pixel - mean) / std * scale` per RGB
    /// channel.
    pub fn normalize(&self, image: &GpuSurface) -> Result<(), PrepError> {
        self.active()?.normalize(&self.ctx, &self.scratch, image)
    }

    /// Aspect-preserving dims whose short side is `config.target_short_side`.
    pub fn resize_target_dims(&self, original: Dims) -> Dims {
        compute_target_dims(original, self.config.target_short_side)
    }

    /// Bilinearly resample `image` into `destination` (any size).
    pub fn resize(&self, image: &GpuSurface, destination: &GpuSurface) -> Result<(), PrepError> {
        self.active()?
            .resize(&self.ctx, &self.scratch, image, destination)
    }

    /// Copy `rect` of `image` into `destination` on the active backend.
    ///
    /// `rect` must lie inside `image` and `destination` must be exactly
    /// `rect.size`; violations are rejected before any GPU work.
    pub fn crop(
        &self,
        image: &GpuSurface,
        destination: &GpuSurface,
        rect: CropRect,
    ) -> Result<(), PrepError> {
        let backend = self.active()?;
        validate_crop(image, destination, &rect)?;
        backend.crop(&self.ctx, &self.scratch, image, destination, rect)
    }

    /// Crop with integer offset/size on the compute backend.
    pub fn crop_compute(
        &self,
        image: &GpuSurface,
        destination: &GpuSurface,
        offset: IVec2,
        size: IVec2,
    ) -> Result<(), PrepError> {
        let Some(Backend::Compute(backend)) = &self.backend else {
            if self.is_shut_down() {
                return Err(PrepError::ShutDown);
            }
            return Err(PrepError::CapabilityMismatch {
                operation: "crop_compute",
                backend: BackendKind::Compute,
            });
        };
        let rect = CropRect::from_signed(offset, size)?;
        validate_crop(image, destination, &rect)?;
        backend.crop(&self.ctx, &self.scratch, image, destination, rect)
    }

    /// Crop with float offset/size on the blit backend.
    ///
    /// The offset is floored and the size rounded; the resulting integer
    /// rectangle is both what gets bounds-checked and what gets drawn.
    /// Available whenever the device can render into the surface format,
    /// including on a compute pipeline.
    pub fn crop_blit(
        &self,
        image: &GpuSurface,
        destination: &GpuSurface,
        offset: Vec2,
        size: Vec2,
    ) -> Result<(), PrepError> {
        let rect = CropRect::from_float(offset, size)?;
        validate_crop(image, destination, &rect)?;
        let backend = match &self.backend {
            None => return Err(PrepError::ShutDown),
            Some(Backend::Blit(backend)) => backend,
            Some(Backend::Compute(_)) => self.blit_fallback()?,
        };
        backend.crop(&self.ctx, &self.scratch, image, destination, rect)
    }

    fn blit_fallback(&self) -> Result<&BlitBackend, PrepError> {
        if let Some(backend) = self.blit_fallback.get() {
            return Ok(backend);
        }
        if !self.supports_blit() {
            return Err(PrepError::CapabilityMismatch {
                operation: "crop_blit",
                backend: BackendKind::Blit,
            });
        }
        let built = BlitBackend::new(&self.ctx, &self.profile)?;
        tracing::debug!("built blit fallback for crop_blit");
        Ok(self.blit_fallback.get_or_init(|| built))
    }

    /// Resize to `target_short_side`, center-crop to `crop_size`, normalize.
    /// Returns a new surface; `image` is left untouched.
    pub fn preprocess(&self, image: &GpuSurface) -> Result<GpuSurface, PrepError> {
        self.active()?;
        let target = self.resize_target_dims(image.dims());
        let rect = CropRect::centered(target, Dims::square(self.config.crop_size))?;

        let resized = GpuSurface::create(&self.ctx, target, "frameprep_preprocess_resized")?;
        self.resize(image, &resized)?;

        let output = GpuSurface::create(&self.ctx, rect.dims(), "frameprep_preprocess_output")?;
        self.crop(&resized, &output, rect)?;
        self.normalize(&output)?;
        Ok(output)
    }
}

impl Drop for TransformPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_crop(
    image: &GpuSurface,
    destination: &GpuSurface,
    rect: &CropRect,
) -> Result<(), PrepError> {
    rect.validate(image.dims())?;
    expect_dims(rect.dims(), destination.dims())?;
    Ok(())
}
