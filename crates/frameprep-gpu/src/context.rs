//! Device/queue bundle shared by every pipeline component.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::capability::DeviceCapabilities;
use crate::error::PrepError;

/// Live and lifetime allocation counts for pipeline-owned GPU resources.
///
/// Cloning shares the counters, so several pipeline instances created from
/// one [`GpuContext`] report into the same tracker.
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    live_buffers: AtomicUsize,
    live_textures: AtomicUsize,
    buffers_created: AtomicUsize,
    textures_created: AtomicUsize,
}

impl AllocationTracker {
    pub(crate) fn buffer_created(&self) {
        self.inner.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.inner.buffers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn buffer_released(&self) {
        self.inner.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn texture_created(&self) {
        self.inner.live_textures.fetch_add(1, Ordering::Relaxed);
        self.inner.textures_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn texture_released(&self) {
        self.inner.live_textures.fetch_sub(1, Ordering::Relaxed);
    }

    /// Parameter buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Relaxed)
    }

    /// Scratch textures currently allocated (in use or pooled).
    pub fn live_textures(&self) -> usize {
        self.inner.live_textures.load(Ordering::Relaxed)
    }

    pub fn buffers_created(&self) -> usize {
        self.inner.buffers_created.load(Ordering::Relaxed)
    }

    pub fn textures_created(&self) -> usize {
        self.inner.textures_created.load(Ordering::Relaxed)
    }
}

/// The wgpu handles a pipeline runs on, plus its capability snapshot.
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub capabilities: DeviceCapabilities,
    tracker: AllocationTracker,
}

impl GpuContext {
    /// Wrap a device the host already created.
    pub fn new(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let capabilities = DeviceCapabilities::detect(adapter, &device);
        Self::with_capabilities(device, queue, capabilities)
    }

    /// Wrap a device with an explicit capability snapshot.
    pub fn with_capabilities(
        device: wgpu::Device,
        queue: wgpu::Queue,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self {
            device,
            queue,
            capabilities,
            tracker: AllocationTracker::default(),
        }
    }

    /// Create an instance, adapter and device. Blocks until ready.
    pub fn request(power_preference: wgpu::PowerPreference) -> Result<Self, PrepError> {
        pollster::block_on(Self::request_async(power_preference))
    }

    async fn request_async(power_preference: wgpu::PowerPreference) -> Result<Self, PrepError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        tracing::info!(
            "frameprep adapter: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("frameprep_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await?;

        Ok(Self::new(&adapter, device, queue))
    }

    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    /// Run `create` inside an out-of-memory error scope.
    ///
    /// Allocation failure is fatal for the calling operation; there is no
    /// retry because exhausted GPU memory does not recover within a frame.
    pub(crate) fn allocate<T>(
        &self,
        label: &'static str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, PrepError> {
        let (resource, error) = self.scoped(wgpu::ErrorFilter::OutOfMemory, create);
        match error {
            None => Ok(resource),
            Some(err) => Err(PrepError::ResourceAllocation {
                label,
                message: err.to_string(),
            }),
        }
    }

    /// Run `create` inside a validation error scope, so shader or pipeline
    /// rejections come back as errors instead of reaching the device's
    /// uncaptured-error handler.
    pub(crate) fn validated<T>(
        &self,
        label: &'static str,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, PrepError> {
        let (resource, error) = self.scoped(wgpu::ErrorFilter::Validation, create);
        match error {
            None => Ok(resource),
            Some(err) => Err(PrepError::PipelineCreation {
                label,
                message: err.to_string(),
            }),
        }
    }

    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let resource = create(&self.device);
        (resource, pollster::block_on(self.device.pop_error_scope()))
    }
}
