//! Short-lived scratch surfaces.
//!
//! Every transform renders into a scratch surface and copies the result into
//! the caller's surface. Scratch surfaces are handed out as
//! [`ScratchSurface`] guards that return the texture to the pool when they go
//! out of scope, so an early `?` return cannot leak one.

use frameprep_core::Dims;
use parking_lot::Mutex;

use crate::buffers::{GpuSurface, check_extent, surface_descriptor};
use crate::context::{AllocationTracker, GpuContext};
use crate::error::PrepError;

/// How a backend writes into its scratch surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchAccess {
    /// Storage-texture writes from a compute kernel (random access).
    WriteEnabled,
    /// Color attachment of a render pass. No storage usage.
    RenderTarget,
}

impl ScratchAccess {
    fn usage(self) -> wgpu::TextureUsages {
        let base = wgpu::TextureUsages::COPY_SRC;
        match self {
            ScratchAccess::WriteEnabled => base | wgpu::TextureUsages::STORAGE_BINDING,
            ScratchAccess::RenderTarget => base | wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ScratchAccess::WriteEnabled => "frameprep_scratch_storage",
            ScratchAccess::RenderTarget => "frameprep_scratch_render",
        }
    }
}

struct Pooled {
    dims: Dims,
    access: ScratchAccess,
    surface: GpuSurface,
}

/// Pool of idle scratch textures keyed by size and access mode.
///
/// Meant for a single producer; concurrent callers get correct bookkeeping
/// but no ordering guarantees between their GPU work.
pub struct ScratchPool {
    idle: Mutex<Vec<Pooled>>,
    capacity: usize,
    tracker: AllocationTracker,
}

impl ScratchPool {
    pub fn new(tracker: AllocationTracker, capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            tracker,
        }
    }

    /// Take an idle surface matching `dims`/`access`, or allocate one.
    pub fn acquire(
        &self,
        ctx: &GpuContext,
        dims: Dims,
        access: ScratchAccess,
    ) -> Result<ScratchSurface<'_>, PrepError> {
        let reused = {
            let mut idle = self.idle.lock();
            idle.iter()
                .position(|p| p.dims == dims && p.access == access)
                .map(|i| idle.swap_remove(i).surface)
        };

        let surface = match reused {
            Some(surface) => surface,
            None => {
                let label = access.label();
                check_extent(ctx, dims, label)?;
                let texture = ctx.allocate(label, |device| {
                    device.create_texture(&surface_descriptor(label, dims, access.usage()))
                })?;
                self.tracker.texture_created();
                tracing::trace!(%dims, ?access, "allocated scratch surface");
                GpuSurface::wrap(texture, dims)
            }
        };

        Ok(ScratchSurface {
            pool: self,
            access,
            surface: Some(surface),
        })
    }

    fn give_back(&self, dims: Dims, access: ScratchAccess, surface: GpuSurface) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(Pooled {
                dims,
                access,
                surface,
            });
        } else {
            drop(idle);
            self.destroy(surface);
        }
    }

    fn destroy(&self, surface: GpuSurface) {
        surface.texture().destroy();
        self.tracker.texture_released();
    }

    /// Destroy every idle surface.
    pub fn drain(&self) {
        let drained: Vec<Pooled> = self.idle.lock().drain(..).collect();
        for pooled in drained {
            self.destroy(pooled.surface);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Drop for ScratchPool {
    fn drop(&mut self) {
        self.drain();
    }
}

/// A scratch surface on loan from a [`ScratchPool`].
pub struct ScratchSurface<'pool> {
    pool: &'pool ScratchPool,
    access: ScratchAccess,
    surface: Option<GpuSurface>,
}

impl ScratchSurface<'_> {
    pub fn surface(&self) -> &GpuSurface {
        self.surface
            .as_ref()
            .expect("scratch surface is only taken on drop")
    }
}

impl Drop for ScratchSurface<'_> {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            self.pool.give_back(surface.dims(), self.access, surface);
        }
    }
}
