//! `#[repr(C)]` mirrors of the WGSL uniform structs.

use frameprep_core::{CropRect, Dims};

/// `ScaleParams` in `compute/normalize.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScaleParamsGpu {
    pub scale: f32,
    pub _pad: [f32; 3],
}

impl ScaleParamsGpu {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            _pad: [0.0; 3],
        }
    }
}

/// `CropParams` in `compute/crop.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CropParamsGpu {
    pub offset: [i32; 2],
    pub size: [i32; 2],
}

impl From<CropRect> for CropParamsGpu {
    fn from(rect: CropRect) -> Self {
        Self {
            offset: rect.offset.as_ivec2().to_array(),
            size: rect.size.as_ivec2().to_array(),
        }
    }
}

/// `CropParams` in `blit/crop.wgsl`: `(offset.x, offset.y, size.x, size.y)`
/// in whole texels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlitCropParamsGpu {
    pub rect: [f32; 4],
}

impl From<CropRect> for BlitCropParamsGpu {
    fn from(rect: CropRect) -> Self {
        let offset = rect.offset.as_vec2();
        let size = rect.size.as_vec2();
        Self {
            rect: [offset.x, offset.y, size.x, size.y],
        }
    }
}

/// `ResizeParams`, shared by both resize shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResizeParamsGpu {
    pub src_size: [f32; 2],
    pub dst_size: [f32; 2],
}

impl ResizeParamsGpu {
    pub fn new(src: Dims, dst: Dims) -> Self {
        Self {
            src_size: src.as_uvec2().as_vec2().to_array(),
            dst_size: dst.as_uvec2().as_vec2().to_array(),
        }
    }
}
