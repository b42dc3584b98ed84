//! Usage and visibility flags shared by every backend.

use bitflags::bitflags;

bitflags! {
    /// How an image will be used. Drives allocation flags and legal layouts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
        const CUBEMAP = 1 << 6;
        const GENERATE_MIPMAPS = 1 << 7;
    }
}

bitflags! {
    /// How a buffer will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

bitflags! {
    /// Shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 0x1;
        const TESS_EVAL = 0x2;
        const TESS_CTRL = 0x4;
        const GEOMETRY = 0x8;
        const FRAGMENT = 0x10;
        const ALL_GRAPHICS = 0x1F;
        const COMPUTE = 0x20;
        const ALL = 0x3F;
    }
}

/// Where buffer memory lives and how the CPU reaches it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Device local, never mapped.
    #[default]
    GpuOnly,
    /// Host visible and coherent, used for staging.
    CpuOnly,
    /// Host visible and coherent, written every frame.
    CpuToGpu,
    /// Host visible and cached, used for readback.
    GpuToCpu,
}

impl MemoryUsage {
    /// Whether the CPU can map this memory.
    #[inline]
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }

    /// Whether CPU writes are visible to the GPU without a flush.
    ///
    /// Uploads into non-coherent memory go through a staging copy.
    #[inline]
    pub const fn is_host_coherent(self) -> bool {
        matches!(self, Self::CpuOnly | Self::CpuToGpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_groups_cover_their_members() {
        assert!(ShaderStages::ALL_GRAPHICS.contains(ShaderStages::VERTEX | ShaderStages::FRAGMENT));
        assert!(!ShaderStages::ALL_GRAPHICS.contains(ShaderStages::COMPUTE));
        assert_eq!(ShaderStages::ALL, ShaderStages::ALL_GRAPHICS | ShaderStages::COMPUTE);
    }

    #[test]
    fn only_coherent_memory_skips_staging() {
        assert!(!MemoryUsage::GpuOnly.is_host_visible());
        assert!(MemoryUsage::CpuToGpu.is_host_coherent());
        assert!(MemoryUsage::GpuToCpu.is_host_visible());
        assert!(!MemoryUsage::GpuToCpu.is_host_coherent());
    }
}
